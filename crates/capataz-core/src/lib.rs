// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # capataz-core
//!
//! Process supervision engine for the Capataz supervisor.
//!
//! - [`Supervisor`] owns named [`Group`]s and exposes the control surface
//! - [`Group`] owns one [`Child`] per port
//! - [`Child`] runs the start/stop/crash-restart state machine on top of a
//!   [`ProcessHandle`]
//! - [`EventBus`] carries lifecycle events up the chain with a shared
//!   `handled` flag
//! - [`Subscriptions`] filter events for in-process and remote subscribers
//!
//! ## Toyota Way
//!
//! - **Jidoka**: an unclaimed crash restarts the child; a claimed one stops
//!   the line
//! - **Genchi Genbutsu**: every transition is traced with its group and port
//! - **Poka-Yoke**: completion races resolve exactly once
//!
//! ## Example
//!
//! ```rust,no_run
//! use capataz_core::{GroupConfig, SubscribeOptions, Supervisor, SupervisorConfig, event};
//!
//! # async fn demo() -> capataz_core::Result<()> {
//! let supervisor = Supervisor::new(SupervisorConfig::default())?;
//! supervisor.prepare(GroupConfig::new("worker", "/usr/local/bin/worker").with_ready_event("ready"))?;
//!
//! // Do not respawn port 7000 after it exits.
//! supervisor.on(
//!     event::EXIT,
//!     &SubscribeOptions::new().group("worker").port(7000_u16),
//!     event::handler(|_, info, _| info.handled = true),
//! );
//!
//! supervisor.start(&"worker:7000".parse()?).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod child;
pub mod config;
pub mod error;
pub mod event;
pub mod group;
pub mod logs;
pub mod once;
pub mod process;
pub mod sink;
pub mod subscription;
pub mod supervisor;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use channel::{BroadcastMessage, BroadcastSource, Inbound};
pub use child::{Child, ChildInfo, StartResponse, StopMethod, StopResponse};
pub use config::{ChildConfig, GroupConfig, RotateAt, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use event::{EventBus, EventData, EventInfo, Handler};
pub use group::Group;
pub use logs::{ChildLogs, FileLogLayer, LogLayer, LogStream, RotatedLogs};
pub use process::{ExitOutcome, ProcessHandle};
pub use sink::{
    BroadcastSink, Envelope, EventRelay, EventSink, EventStream, Handshake, PublishedEvent,
    TracingSink,
};
pub use subscription::{PortFilter, SubscribeOptions, Subscription, Subscriptions};
pub use supervisor::{PrepareResponse, StatusResponse, Supervisor};
pub use types::{HandleId, Signal, Status, SupervisorId};
