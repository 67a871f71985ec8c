// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # capataz-observe
//!
//! Resource sampling for supervised processes.
//!
//! The supervisor does not enforce CPU or memory limits. It only reports
//! them, and this crate is where the numbers come from:
//!
//! - [`ProcessMonitor`] samples one process at a time from `/proc`
//! - [`ResourceSample`] is the point-in-time result handed back to `info`
//!
//! ## Example
//!
//! ```rust,no_run
//! use capataz_observe::ProcessMonitor;
//!
//! let mut monitor = ProcessMonitor::new();
//! let sample = monitor.sample(std::process::id())?;
//! println!("rss = {} bytes", sample.memory_bytes);
//! # Ok::<(), capataz_observe::ObserveError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod monitor;

pub use error::{ObserveError, Result};
pub use monitor::{ProcessMonitor, ProcessState, ResourceSample};
