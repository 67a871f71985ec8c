//! Capataz: embeddable process supervisor for fleets of long-running workers.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use capataz::prelude::*;
//!
//! # async fn demo() -> capataz::core::Result<()> {
//! let supervisor = Supervisor::new(SupervisorConfig::default())?;
//! supervisor.prepare(GroupConfig::new("worker", "/usr/local/bin/worker").with_ready_event("ready"))?;
//! supervisor.start(&ChildConfig::new("worker", 7000)).await?;
//! supervisor.kill().await;
//! # Ok(())
//! # }
//! ```

pub use capataz_core as core;
pub use capataz_discovery as discovery;
pub use capataz_observe as observe;

/// Prelude module for common imports.
pub mod prelude {
    pub use capataz_core::event::{self, handler};
    pub use capataz_core::{
        BroadcastSink, ChildConfig, ChildInfo, EventData, EventInfo, EventRelay, GroupConfig,
        Signal, StartResponse, Status, StopResponse, SubscribeOptions, Supervisor,
        SupervisorConfig, SupervisorError, SupervisorId,
    };
    pub use capataz_discovery::{Discovery, DiscoveryConfig, DiscoveryEvent};
    pub use capataz_observe::ResourceSample;
}
