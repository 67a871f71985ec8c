// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # capataz-discovery
//!
//! Multi-host presence detection for Capataz supervisors.
//!
//! Every supervisor multicasts a small heartbeat datagram on a fixed
//! interval and listens for everyone else's:
//!
//! - [`Heartbeat`] is the datagram and its codec
//! - [`PeerTable`] tracks the last time each `hostname:pid` was heard
//! - [`Discovery`] runs the socket and reports [`DiscoveryEvent`]s
//!
//! A peer is dropped once it has been silent for three intervals.
//!
//! ## Example
//!
//! ```rust,no_run
//! use capataz_discovery::{Discovery, DiscoveryConfig, DiscoveryEvent};
//!
//! # async fn demo() -> capataz_discovery::Result<()> {
//! let discovery = std::sync::Arc::new(Discovery::new(DiscoveryConfig::default()));
//! let mut events = discovery.subscribe();
//! let runner = std::sync::Arc::clone(&discovery);
//! tokio::spawn(async move { runner.run().await });
//!
//! while let Ok(event) = events.recv().await {
//!     if let DiscoveryEvent::Timeout(peer) = event {
//!         println!("lost {}", peer.key());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod heartbeat;
pub mod peers;
pub mod socket;

pub use error::{DiscoveryError, Result};
pub use heartbeat::Heartbeat;
pub use peers::{Peer, PeerTable};
pub use socket::{Discovery, DiscoveryConfig, DiscoveryEvent, local_hostname};
