//! `porta-drivers` provides architecture-agnostic drivers turning pins and
//! peripherals into porta ports.
//!
//! All drivers are implemented using only the [`embedded-hal`] traits, so
//! they work on any platform that supports these abstractions. Each driver
//! implements [`porta::PortDriver`] and can be handed to
//! [`porta::Core::add_port`].
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Digital input and output drivers.
#[cfg(feature = "digital")]
pub mod digital;

/// The `PWM` output driver.
#[cfg(feature = "pwm")]
pub mod pwm;
