//! `porta-os` runs a porta device on an operating system.
//!
//! The [`Runtime`] owns the [`porta::Core`] and drives its scheduler tick
//! from a `tokio` interval. Everything touching the ports happens on the
//! runtime task, between two ticks:
//!
//! - Notifications queued by the core are forwarded over a channel.
//! - Persisted values and configuration edits are saved to a `JSON` state
//!   file, in batches.
//! - Requests sent through a [`RuntimeHandle`] are answered.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The clock feeding the scheduler.
pub mod clock;
/// Runtime configuration.
pub mod config;
/// Error management.
pub mod error;
/// The runtime task and its handle.
pub mod runtime;
/// Port state persistence.
pub mod state;

pub use clock::SystemClock;
pub use config::RuntimeConfig;
pub use error::{Error, ErrorKind, Result};
pub use runtime::{Runtime, RuntimeHandle};
pub use state::{load_state, save_state};

pub use tokio_util::sync::CancellationToken;
