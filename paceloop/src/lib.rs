//! Paceloop - load-adaptive work loop driver
//!
//! This library runs caller-supplied work in a continue → work → sleep cycle
//! and adjusts the sleep duration against the host's 1-minute load average,
//! so a background job consumes a bounded share of the machine instead of
//! running flat out.
//!
//! # High-Level API
//!
//! Implement [`controller::Controller`] for your job and hand it to
//! [`daemon::Daemon`]:
//!
//! ```ignore
//! use paceloop::controller::Controller;
//! use paceloop::daemon::{Daemon, DaemonConfig, DaemonHandle};
//!
//! struct QueueDrain { /* ... */ }
//!
//! impl Controller for QueueDrain {
//!     type Error = std::io::Error;
//!
//!     fn should_continue(&mut self) -> bool {
//!         // e.g. poll a shutdown flag
//!         true
//!     }
//!
//!     fn do_work(&mut self) -> Result<(), Self::Error> {
//!         // drain one batch
//!         Ok(())
//!     }
//! }
//!
//! // Blocks the calling thread until the controller says stop.
//! Daemon::start(DaemonConfig::default(), QueueDrain { /* ... */ })?;
//! ```

pub mod config;
pub mod controller;
pub mod daemon;
pub mod host;
pub mod logging;
pub mod throttle;

/// Version of the paceloop library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
