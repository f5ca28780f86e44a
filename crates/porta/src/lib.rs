//! The evaluation core of a `porta` device.
//!
//! A device exposes a set of ports: physical inputs and outputs such as
//! `GPIO` pins, `PWM` channels and `ADC` readings, or virtual values kept
//! only in memory. This crate provides APIs to:
//!
//! - Register ports in a fixed-size registry where each port owns a slot,
//!   which doubles as its bit in dependency and change masks.
//! - Parse the textual expression language into trees that can be
//!   re-evaluated safely at every scheduler tick. Expressions reference other
//!   ports, the clock and a table of built-in functions, some of which keep a
//!   private state across ticks (delays, timers, moving windows).
//! - Smooth freshly sampled values through median, average or majority-vote
//!   filters before change detection.
//! - Run the scheduler tick: sample ports on their own cadence, detect value
//!   changes and re-evaluate exactly the expressions depending on them,
//!   without ever looping forever on self-referencing expressions.
//!
//! The core never performs I/O on its own behalf. Outbound work, such as
//! event pushes and persistence, is queued and drained later by the host.
//!
//! This crate only needs an allocator, so it can be compiled for both `std`
//! and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

mod api;

/// Dependency masks and expression loop analysis.
pub mod deps;
/// Error management.
pub mod error;
/// Expression evaluation.
pub mod eval;
/// Expression trees.
pub mod expr;
/// Port value filters.
pub mod filter;
/// The built-in function table.
pub mod functions;
/// The expression parser.
pub mod parser;
/// Port definition, configuration and driver interface.
pub mod port;
/// The port registry.
pub mod registry;
/// The change-driven scheduler.
pub mod scheduler;
/// Private state of stateful built-in functions.
pub mod stateful;
/// The value model.
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use eval::Now;
pub use expr::Expr;
pub use filter::FilterKind;
pub use port::{Port, PortConfig, PortDriver, PortKind};
pub use scheduler::{Core, CoreConfig, Notification, TickStats};
pub use value::Value;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
