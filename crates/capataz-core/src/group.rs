//! A named workload and the children running it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel::BroadcastMessage;
use crate::child::{Child, ChildInfo, StartResponse, StopResponse};
use crate::config::{ChildConfig, GroupConfig};
use crate::error::{Result, SupervisorError};
use crate::event::EventBus;
use crate::logs::{ChildLogs, LogLayer, RotatedLogs};
use crate::types::Status;

/// Owns every [`Child`] of one [`GroupConfig`], keyed by port.
///
/// Children are created on first reference and live until the group is
/// destroyed.
pub struct Group {
    config: Arc<GroupConfig>,
    bus: EventBus,
    children: RwLock<HashMap<u16, Arc<Child>>>,
    log_layer: Option<Arc<dyn LogLayer>>,
    rotate_on_start: bool,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.config.name)
            .field("ports", &self.ports())
            .finish_non_exhaustive()
    }
}

impl Group {
    /// Creates an empty group whose events bubble into `parent`.
    #[must_use]
    pub fn new(
        config: GroupConfig,
        parent: &EventBus,
        log_layer: Option<Arc<dyn LogLayer>>,
        rotate_on_start: bool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            bus: EventBus::with_parent(parent),
            children: RwLock::new(HashMap::new()),
            log_layer,
            rotate_on_start,
        }
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The immutable workload definition.
    #[must_use]
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// This group's event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The child on `port`, created stopped if it does not exist yet.
    pub fn child(&self, port: u16) -> Arc<Child> {
        if let Some(child) = self.children.read().get(&port) {
            return Arc::clone(child);
        }
        let mut children = self.children.write();
        let child = children.entry(port).or_insert_with(|| {
            tracing::debug!(group = %self.config.name, port, "creating child");
            let logs = self
                .log_layer
                .as_ref()
                .map(|layer| ChildLogs::new(Arc::clone(layer), self.config.name.clone(), port));
            Child::new(
                Arc::clone(&self.config),
                port,
                &self.bus,
                logs,
                self.rotate_on_start,
            )
        });
        Arc::clone(child)
    }

    /// The child on `port`, if it was ever referenced.
    #[must_use]
    pub fn existing(&self, port: u16) -> Option<Arc<Child>> {
        self.children.read().get(&port).cloned()
    }

    /// Known ports, ascending.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.children.read().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn children(&self) -> Vec<Arc<Child>> {
        let mut children: Vec<Arc<Child>> = self.children.read().values().cloned().collect();
        children.sort_by_key(|c| c.port());
        children
    }

    /// Status of `port` without creating a child.
    #[must_use]
    pub fn status(&self, port: u16) -> Status {
        self.existing(port).map_or(Status::Undefined, |c| c.status())
    }

    /// Starts the child named by `config`.
    ///
    /// # Errors
    /// See [`Child::start`].
    pub async fn start(&self, config: &ChildConfig) -> Result<StartResponse> {
        self.child(config.port).start(config).await
    }

    /// Stops the child named by `config`.
    ///
    /// # Errors
    /// See [`Child::stop`].
    pub async fn stop(&self, config: &ChildConfig) -> Result<StopResponse> {
        self.child(config.port).stop(config).await
    }

    /// Rotates the logs of the child on `port`.
    ///
    /// # Errors
    /// See [`Child::rotate_logs`].
    pub async fn rotate_logs(&self, port: u16) -> Result<RotatedLogs> {
        self.child(port).rotate_logs().await
    }

    /// Rotates every known child's logs. Failures are logged and skipped.
    pub async fn rotate_all_logs(&self) -> HashMap<u16, RotatedLogs> {
        let mut rotated = HashMap::new();
        for child in self.children() {
            match child.rotate_logs().await {
                Ok(paths) => {
                    rotated.insert(child.port(), paths);
                }
                Err(e) => {
                    tracing::warn!(group = %self.config.name, port = child.port(), error = %e, "log rotation failed");
                }
            }
        }
        rotated
    }

    /// Info for the child on `port`.
    pub fn info(&self, port: u16) -> ChildInfo {
        self.child(port).info()
    }

    /// Info for every known child, ascending by port.
    #[must_use]
    pub fn info_all(&self) -> Vec<ChildInfo> {
        self.children().iter().map(|c| c.info()).collect()
    }

    /// Delivers `message` to every running child, skipping its origin
    /// unless `include_self`. Returns how many children received it.
    pub fn broadcast(&self, message: &BroadcastMessage, include_self: bool) -> usize {
        self.children()
            .iter()
            .filter(|c| include_self || !message.is_from(self.name(), c.port()))
            .filter(|c| c.deliver(message))
            .count()
    }

    /// Stops every running child concurrently.
    pub async fn stop_all(&self) -> Vec<(u16, Result<StopResponse>)> {
        let mut tasks = tokio::task::JoinSet::new();
        for child in self.children().into_iter().filter(|c| c.is_running()) {
            let config = ChildConfig::new(self.config.name.clone(), child.port());
            tasks.spawn(async move { (child.port(), child.stop(&config).await) });
        }
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(group = %self.config.name, error = %e, "stop task failed"),
            }
        }
        results.sort_by_key(|(port, _)| *port);
        results
    }

    /// Whether any child is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.children.read().values().any(|c| c.is_running())
    }

    /// Tears down every child and detaches the group from its parent.
    ///
    /// # Errors
    /// Returns [`SupervisorError::State`] if any child is running; nothing
    /// is torn down in that case.
    pub fn destroy(&self) -> Result<()> {
        let mut children = self.children.write();
        if let Some(running) = children.values().find(|c| c.is_running()) {
            return Err(SupervisorError::state(format!(
                "cannot destroy group {}: port {} is running",
                self.config.name,
                running.port()
            )));
        }
        for child in children.values() {
            child.destroy()?;
        }
        children.clear();
        self.bus.destroy();
        tracing::info!(group = %self.config.name, "destroyed group");
        Ok(())
    }
}
