//! The supervisor: owns every group and exposes the control surface.
//!
//! # Toyota Way: Genchi Genbutsu (現地現物)
//! Every event that reaches the top of the bus is handed to in-process
//! subscribers first and then to the [`EventSink`], so remote observers see
//! the same handled flag the state machine acted on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::BroadcastMessage;
use crate::child::{ChildInfo, StartResponse, StopResponse};
use crate::config::{ChildConfig, GroupConfig, SupervisorConfig, validate_group_name};
use crate::error::{Result, SupervisorError};
use crate::event::{self, EventBus, EventData, EventInfo, Handler};
use crate::group::Group;
use crate::logs::{FileLogLayer, LogLayer, RotatedLogs};
use crate::sink::{EventSink, Handshake, PublishedEvent, TracingSink};
use crate::subscription::{SubscribeOptions, Subscriptions};
use crate::types::{Status, SupervisorId};

/// Archive pruning interval when no daily rotation time is configured.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Result of [`Supervisor::prepare`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    /// A new group was registered.
    pub created: bool,
    /// A group with this name already existed.
    pub existed: bool,
    /// The registered configuration (the existing one if `existed`).
    pub config: GroupConfig,
}

/// Result of [`Supervisor::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Numeric status.
    pub status_code: u8,
    /// Status name.
    pub status_text: &'static str,
}

impl From<Status> for StatusResponse {
    fn from(status: Status) -> Self {
        Self {
            status_code: status.code(),
            status_text: status.as_str(),
        }
    }
}

/// Local process supervisor.
///
/// ```rust,no_run
/// use capataz_core::{ChildConfig, GroupConfig, Supervisor, SupervisorConfig};
///
/// # async fn demo() -> capataz_core::Result<()> {
/// let supervisor = Supervisor::new(SupervisorConfig::default())?;
/// supervisor.prepare(GroupConfig::new("web", "/usr/bin/web-worker").with_ready_event("ready"))?;
/// let started = supervisor.start(&"web:7000".parse::<ChildConfig>()?).await?;
/// assert!(started.started);
/// supervisor.kill().await;
/// # Ok(())
/// # }
/// ```
pub struct Supervisor {
    this: Weak<Supervisor>,
    id: SupervisorId,
    config: SupervisorConfig,
    groups: RwLock<HashMap<String, Arc<Group>>>,
    bus: EventBus,
    subscriptions: Arc<Subscriptions>,
    sink: Arc<dyn EventSink>,
    log_layer: Option<Arc<dyn LogLayer>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("groups", &self.list())
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Creates a supervisor that reports events through `tracing`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SupervisorConfig) -> Result<Arc<Self>> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Creates a supervisor that publishes events to `sink`.
    ///
    /// Groups listed in the configuration are prepared, and the handshake
    /// is announced on the sink.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn with_sink(config: SupervisorConfig, sink: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        config.validate()?;
        let log_layer = config
            .log_dir
            .as_ref()
            .map(|dir| Arc::new(FileLogLayer::new(dir)) as Arc<dyn LogLayer>);
        let (shutdown, _) = watch::channel(false);

        let supervisor = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            id: SupervisorId::new(),
            config: config.clone(),
            groups: RwLock::new(HashMap::new()),
            bus: EventBus::new(),
            subscriptions: Arc::new(Subscriptions::new()),
            sink,
            log_layer,
            shutdown,
        });
        supervisor.install_relay();

        for group in &config.groups {
            supervisor.prepare(group.clone())?;
        }

        supervisor.sink.handshake(&supervisor.handshake());
        tracing::info!(id = %supervisor.id, groups = config.groups.len(), "supervisor created");
        Ok(supervisor)
    }

    /// Top-of-bus handlers, in order: broadcast fan-out, in-process
    /// subscribers, then the sink.
    fn install_relay(&self) {
        let this = self.this.clone();
        self.bus.attach(
            event::BROADCAST,
            event::handler(move |_, info, data| {
                let (Some(supervisor), Some(group), Some(port)) = (this.upgrade(), &info.group, info.port)
                else {
                    return;
                };
                if let EventData::Broadcast {
                    event,
                    data,
                    include_self,
                } = data
                {
                    let message = BroadcastMessage::new(event.clone(), data.clone(), group.clone(), port);
                    supervisor.broadcast(&message, *include_self);
                }
            }),
        );

        let subscriptions = Arc::clone(&self.subscriptions);
        self.bus.attach(
            event::WILDCARD,
            event::handler(move |name, info, data| {
                subscriptions.dispatch(name, info, data);
            }),
        );

        let sink = Arc::clone(&self.sink);
        self.bus.attach(
            event::WILDCARD,
            event::handler(move |name, info, data| {
                sink.publish(&PublishedEvent {
                    event: name.to_string(),
                    info: info.clone(),
                    data: data.clone(),
                });
            }),
        );
    }

    /// Instance identifier published in the handshake.
    #[must_use]
    pub const fn id(&self) -> SupervisorId {
        self.id
    }

    /// Configuration this supervisor was created with.
    #[must_use]
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The top-level event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Package version.
    #[must_use]
    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Identity announced to subscribers.
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake {
            id: self.id,
            version: Self::version().to_string(),
            config: self.config.clone(),
        }
    }

    /// Registers a workload. Re-preparing an existing name returns the
    /// stored configuration unchanged.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Config`] for an invalid name or config.
    pub fn prepare(&self, config: GroupConfig) -> Result<PrepareResponse> {
        validate_group_name(&config.name)?;
        let mut groups = self.groups.write();
        if let Some(existing) = groups.get(&config.name) {
            return Ok(PrepareResponse {
                created: false,
                existed: true,
                config: existing.config().clone(),
            });
        }
        config.validate()?;
        let group = Group::new(
            config.clone(),
            &self.bus,
            self.log_layer.clone(),
            self.config.log_rotate_on_start,
        );
        groups.insert(config.name.clone(), Arc::new(group));
        tracing::info!(group = %config.name, executable = %config.executable.display(), "prepared group");
        Ok(PrepareResponse {
            created: true,
            existed: false,
            config,
        })
    }

    /// The group named `name`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::GroupNotFound`] if it was never prepared.
    pub fn group(&self, name: &str) -> Result<Arc<Group>> {
        self.groups
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::GroupNotFound(name.to_string()))
    }

    fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self.groups.read().values().cloned().collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    /// Starts a child. `"group:port"` parses into a [`ChildConfig`].
    ///
    /// # Errors
    /// Configuration errors, [`SupervisorError::AlreadyRunning`], or spawn
    /// failures.
    pub async fn start(&self, config: &ChildConfig) -> Result<StartResponse> {
        config.validate()?;
        self.group(&config.group)?.start(config).await
    }

    /// Stops a child.
    ///
    /// # Errors
    /// Configuration errors only; stopping a stopped child succeeds.
    pub async fn stop(&self, config: &ChildConfig) -> Result<StopResponse> {
        config.validate()?;
        self.group(&config.group)?.stop(config).await
    }

    /// Status of a child. Never creates one; unknown children and groups
    /// are [`Status::Undefined`].
    #[must_use]
    pub fn status(&self, config: &ChildConfig) -> StatusResponse {
        self.groups
            .read()
            .get(&config.group)
            .map_or(Status::Undefined, |g| g.status(config.port))
            .into()
    }

    /// Known ports per group.
    #[must_use]
    pub fn list(&self) -> BTreeMap<String, Vec<u16>> {
        self.groups
            .read()
            .iter()
            .map(|(name, group)| (name.clone(), group.ports()))
            .collect()
    }

    /// Rotates one child's logs while it keeps running.
    ///
    /// # Errors
    /// Configuration or log layer errors.
    pub async fn rotate_logs(&self, config: &ChildConfig) -> Result<RotatedLogs> {
        config.validate()?;
        self.group(&config.group)?.rotate_logs(config.port).await
    }

    /// Rotates every known child's logs, keyed by `"group:port"`.
    pub async fn rotate_all_logs(&self) -> BTreeMap<String, RotatedLogs> {
        let mut rotated = BTreeMap::new();
        for group in self.groups() {
            for (port, paths) in group.rotate_all_logs().await {
                rotated.insert(format!("{}:{port}", group.name()), paths);
            }
        }
        rotated
    }

    /// Info keyed by `"group:port"`.
    ///
    /// With no targets, reports every known child. Named targets are
    /// created if needed.
    ///
    /// # Errors
    /// Returns an error if a target is invalid or its group is unknown.
    pub fn info(&self, targets: &[ChildConfig]) -> Result<BTreeMap<String, ChildInfo>> {
        let mut infos = BTreeMap::new();
        if targets.is_empty() {
            for group in self.groups() {
                for info in group.info_all() {
                    infos.insert(format!("{}:{}", info.group, info.port), info);
                }
            }
            return Ok(infos);
        }
        for target in targets {
            target.validate()?;
            let info = self.group(&target.group)?.info(target.port);
            infos.insert(target.key(), info);
        }
        Ok(infos)
    }

    /// Sends a JSON value to a running child.
    ///
    /// # Errors
    /// Returns an error if the group is unknown or the child is not running.
    pub fn send(&self, config: &ChildConfig, payload: &Value) -> Result<()> {
        config.validate()?;
        let group = self.group(&config.group)?;
        let child = group.existing(config.port).ok_or_else(|| {
            SupervisorError::state(format!("{} is not running", config.key()))
        })?;
        child.send(payload)
    }

    /// Fans `message` out to every running child of every group, skipping
    /// its origin unless `include_self`. Returns how many received it.
    pub fn broadcast(&self, message: &BroadcastMessage, include_self: bool) -> usize {
        let delivered = self
            .groups()
            .iter()
            .map(|g| g.broadcast(message, include_self))
            .sum();
        tracing::debug!(
            event = %message.event,
            origin = %format!("{}:{}", message.source.group, message.source.port),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Removes a group.
    ///
    /// # Errors
    /// [`SupervisorError::GroupNotFound`], or [`SupervisorError::State`] if
    /// any of its children is running.
    pub fn destroy_group(&self, name: &str) -> Result<()> {
        let group = self.group(name)?;
        group.destroy()?;
        self.groups.write().remove(name);
        Ok(())
    }

    /// Registers an in-process subscriber.
    ///
    /// It runs inside dispatch, so setting `info.handled` on an exit
    /// suppresses the automatic restart.
    pub fn on(&self, event: &str, options: &SubscribeOptions, handler: Handler) {
        self.subscriptions.on(event, options, handler);
    }

    /// Removes in-process subscribers. See [`Subscriptions::remove_listener`].
    pub fn remove_listener(
        &self,
        event: Option<&str>,
        options: Option<&SubscribeOptions>,
        handler: Option<&Handler>,
    ) -> usize {
        self.subscriptions.remove_listener(event, options, handler)
    }

    /// Publishes an event with no originating child, e.g. from an embedding
    /// program.
    pub fn emit(&self, event: &str, data: &EventData) -> EventInfo {
        let mut info = EventInfo::detached();
        self.bus.invoke(event, &mut info, data);
        info
    }

    /// Stops every running child concurrently, then signals shutdown.
    pub async fn kill(&self) {
        tracing::info!(id = %self.id, "shutting down");
        let mut tasks = tokio::task::JoinSet::new();
        for group in self.groups() {
            tasks.spawn(async move { (group.name().to_string(), group.stop_all().await) });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((group, results)) => {
                    for (port, result) in results {
                        match result {
                            Ok(stopped) if stopped.forced => {
                                tracing::warn!(group = %group, port, "force-killed during shutdown");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(group = %group, port, error = %e, "stop failed during shutdown"),
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "shutdown task failed"),
            }
        }
        self.shutdown.send_replace(true);
    }

    /// Whether [`Supervisor::kill`] has completed.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`Supervisor::kill`] has completed.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives as long as self.
        let _ = rx.wait_for(|down| *down).await;
    }

    /// Spawns the daily rotation and archive pruning task.
    ///
    /// Returns `None` when log capture is off. The task ends on shutdown.
    pub fn spawn_log_maintenance(&self) -> Option<JoinHandle<()>> {
        let layer = self.log_layer.clone()?;
        let this = self.this.clone();
        let rotate_at = self.config.log_rotate_at;
        let ttl = self.config.log_ttl;
        let mut shutdown = self.shutdown.subscribe();

        Some(tokio::spawn(async move {
            loop {
                let wait = rotate_at.map_or(PRUNE_INTERVAL, |at| at.until_next(SystemTime::now()));
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    _ = shutdown.wait_for(|down| *down) => break,
                }
                let Some(supervisor) = this.upgrade() else {
                    break;
                };
                if rotate_at.is_some() {
                    let rotated = supervisor.rotate_all_logs().await;
                    tracing::info!(children = rotated.len(), "daily log rotation");
                }
                match layer.prune(ttl).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "pruned log archives"),
                    Err(e) => tracing::warn!(error = %e, "log pruning failed"),
                }
            }
            tracing::debug!("log maintenance stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Arc<Supervisor> {
        Supervisor::new(SupervisorConfig::default()).unwrap()
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let sup = supervisor();
        let first = sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        assert!(first.created);
        assert!(!first.existed);

        let second = sup
            .prepare(GroupConfig::new("web", "/bin/false").with_args(["-x"]))
            .unwrap();
        assert!(!second.created);
        assert!(second.existed);
        assert_eq!(second.config.executable, std::path::PathBuf::from("/bin/true"));
    }

    #[test]
    fn test_prepare_rejects_bad_name() {
        let sup = supervisor();
        let err = sup.prepare(GroupConfig::new("bad name", "/bin/true")).unwrap_err();
        assert!(err.is_config());
        assert!(sup.list().is_empty());
    }

    #[test]
    fn test_status_never_creates() {
        let sup = supervisor();
        sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        let status = sup.status(&ChildConfig::new("web", 7000));
        assert_eq!(status.status_code, 60);
        assert_eq!(status.status_text, "UNDEFINED");
        assert_eq!(sup.status(&ChildConfig::new("nope", 1)).status_code, 60);
        assert_eq!(sup.list()["web"], Vec::<u16>::new());
    }

    #[tokio::test]
    async fn test_start_unknown_group() {
        let sup = supervisor();
        let err = sup.start(&ChildConfig::new("ghost", 1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_port_zero() {
        let sup = supervisor();
        sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        let err = sup.start(&ChildConfig::new("web", 0)).await.unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_info_creates_named_children() {
        let sup = supervisor();
        sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        assert!(sup.info(&[]).unwrap().is_empty());
        let infos = sup.info(&[ChildConfig::new("web", 7)]).unwrap();
        assert_eq!(infos["web:7"].status, Status::Stopped);
        assert_eq!(sup.list()["web"], vec![7]);
        assert_eq!(sup.info(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_configured_groups_are_prepared() {
        let config = SupervisorConfig {
            groups: vec![GroupConfig::new("a", "/bin/true"), GroupConfig::new("b", "/bin/true")],
            ..SupervisorConfig::default()
        };
        let sup = Supervisor::new(config).unwrap();
        assert_eq!(sup.list().keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_configured_groups_rejected() {
        let config = SupervisorConfig {
            groups: vec![GroupConfig::new("a", "/bin/true"), GroupConfig::new("a", "/bin/true")],
            ..SupervisorConfig::default()
        };
        assert!(Supervisor::new(config).is_err());
    }

    #[test]
    fn test_destroy_group() {
        let sup = supervisor();
        sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        sup.destroy_group("web").unwrap();
        assert!(sup.list().is_empty());
        assert!(matches!(
            sup.destroy_group("web"),
            Err(SupervisorError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_send_to_stopped_child_fails() {
        let sup = supervisor();
        sup.prepare(GroupConfig::new("web", "/bin/true")).unwrap();
        let err = sup
            .send(&ChildConfig::new("web", 1), &serde_json::json!({"x": 1}))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_kill_resolves_shutdown() {
        let sup = supervisor();
        assert!(!sup.is_shut_down());
        sup.kill().await;
        assert!(sup.is_shut_down());
        tokio::time::timeout(Duration::from_secs(1), sup.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn test_version() {
        assert_eq!(Supervisor::version(), env!("CARGO_PKG_VERSION"));
        assert!(!Supervisor::version().is_empty());
    }

    #[test]
    fn test_no_maintenance_without_log_dir() {
        let sup = supervisor();
        assert!(sup.spawn_log_maintenance().is_none());
    }
}
