//! The per-port supervision unit.
//!
//! A [`Child`] owns one `(group, port)` slot and drives the lifecycle
//! state machine on top of successive [`ProcessHandle`]s:
//!
//! ```text
//!            start                ready / init timeout
//! STOPPED ─────────→ STARTING ─────────────────────→ RUNNING
//!    ↑                  │ exit before ready              │ stop
//!    │                  ↓                                ↓
//!    └──────────────────┴──────── exit ──────────── STOPPING
//!
//! ERROR is reachable from any state on a spawn or runtime error.
//! ```
//!
//! # Jidoka (自働化)
//! An unexpected exit nobody claims is restarted automatically. A
//! subscriber that sets `handled` on the exit event stops the line.
//!
//! Commands for one child are serialised by an async operation lock.
//! Notifications (exit, messages, timers) never take that lock; they are
//! made safe by comparing the reporting handle with the current one and
//! by exactly-once [`Claim`]s.

use std::sync::{Arc, Weak};
use std::time::Duration;

use capataz_observe::{ProcessMonitor, ResourceSample};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

use crate::channel::{Inbound, decode_line};
use crate::config::{ChildConfig, GroupConfig};
use crate::error::{Result, SupervisorError};
use crate::event::{self, EventBus, EventData, EventInfo, Handler};
use crate::logs::{ChildLogs, RotatedLogs};
use crate::once::Claim;
use crate::process::{ExitOutcome, ProcessHandle, ProcessWatch};
use crate::types::{Signal, Status};

/// How often a stop checks for the exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long an exit waits for the channel reader to deliver final lines.
const READER_GRACE: Duration = Duration::from_millis(50);

/// How long an exit waits for the log pumps to copy buffered output.
const LOG_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Oldest errors are dropped beyond this.
pub const MAX_ERRORS: usize = 100;

/// Result of [`Child::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// A running process was stopped first.
    pub restarted: bool,
    /// A process was started (ready or assumed ready).
    pub started: bool,
    /// The stop before the restart had to force-kill.
    pub force_restarted: bool,
    /// The process sent its ready token.
    pub ready: bool,
    /// The process exited before it was ready.
    pub crashed: bool,
    /// Effective configuration after the merge.
    pub config: ChildConfig,
}

/// Result of [`Child::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    /// A running process was stopped.
    pub stopped: bool,
    /// The graceful timeout elapsed and the process was killed.
    pub forced: bool,
    /// Effective configuration after the merge.
    pub config: ChildConfig,
}

/// Snapshot returned by [`Child::info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInfo {
    /// Group name.
    pub group: String,
    /// Port.
    pub port: u16,
    /// Lifecycle state.
    pub status: Status,
    /// Numeric status code.
    pub status_code: u8,
    /// PID of the live process.
    pub pid: Option<u32>,
    /// Unexpected exits so far.
    pub crash_count: u32,
    /// Recorded failures, oldest first.
    pub errors: Vec<String>,
    /// Stored configuration.
    pub config: ChildConfig,
    /// CPU and memory of the live process.
    pub resources: Option<ResourceSample>,
}

/// How a graceful stop is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMethod {
    /// Deliver the group's graceful signal.
    Signal,
    /// Send the signal name over the channel.
    Message,
}

/// Chooses the graceful stop method.
///
/// Message mode only applies on Windows hosts, where POSIX signals do not
/// exist.
#[must_use]
pub const fn stop_method_for(windows: bool, use_message_on_windows: bool) -> StopMethod {
    if windows && use_message_on_windows {
        StopMethod::Message
    } else {
        StopMethod::Signal
    }
}

#[derive(Debug)]
enum StartOutcome {
    Ready,
    TimedOut,
    Exited,
    Failed(String),
}

#[derive(Debug)]
struct ChildState {
    config: ChildConfig,
    status: Status,
    process: Option<Arc<ProcessHandle>>,
    errors: Vec<String>,
    crash_count: u32,
    /// Bumped by every start/stop command; a pending auto-restart only runs
    /// if no command came in after the exit it reacts to.
    epoch: u64,
    destroyed: bool,
}

impl ChildState {
    fn is_running(&self) -> bool {
        self.status < Status::Stopped && self.process.as_ref().is_some_and(|p| p.is_connected())
    }

    fn is_current(&self, handle: &Arc<ProcessHandle>) -> bool {
        self.process.as_ref().is_some_and(|p| Arc::ptr_eq(p, handle))
    }

    fn record_error(&mut self, error: String) {
        if self.errors.len() >= MAX_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
    }
}

/// One supervised `(group, port)` slot.
pub struct Child {
    this: Weak<Child>,
    group: Arc<GroupConfig>,
    port: u16,
    bus: EventBus,
    logs: Option<ChildLogs>,
    rotate_on_start: bool,
    state: Mutex<ChildState>,
    monitor: Mutex<ProcessMonitor>,
    op: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Child")
            .field("group", &self.group.name)
            .field("port", &self.port)
            .field("status", &st.status)
            .field("crash_count", &st.crash_count)
            .finish_non_exhaustive()
    }
}

impl Child {
    /// Creates a stopped child whose events bubble into `parent`.
    #[must_use]
    pub fn new(
        group: Arc<GroupConfig>,
        port: u16,
        parent: &EventBus,
        logs: Option<ChildLogs>,
        rotate_on_start: bool,
    ) -> Arc<Self> {
        let config = ChildConfig::new(group.name.clone(), port);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            group,
            port,
            bus: EventBus::with_parent(parent),
            logs,
            rotate_on_start,
            state: Mutex::new(ChildState {
                config,
                status: Status::Stopped,
                process: None,
                errors: vec![],
                crash_count: 0,
                epoch: 0,
                destroyed: false,
            }),
            monitor: Mutex::new(ProcessMonitor::new()),
            op: tokio::sync::Mutex::new(()),
        })
    }

    /// Group name.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.group.name
    }

    /// Port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// This child's event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// True while a connected process exists and the child is not done
    /// stopping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    /// Unexpected exits so far.
    #[must_use]
    pub fn crash_count(&self) -> u32 {
        self.state.lock().crash_count
    }

    /// Recorded failures, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    /// Stored configuration.
    #[must_use]
    pub fn config(&self) -> ChildConfig {
        self.state.lock().config.clone()
    }

    /// PID of the live process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        let st = self.state.lock();
        if st.is_running() {
            st.process.as_ref().and_then(|p| p.pid())
        } else {
            None
        }
    }

    /// Starts the process.
    ///
    /// `update` is merged into the stored configuration first. A running
    /// child is left alone with `if_not_running`, restarted with `restart`,
    /// and otherwise refused.
    ///
    /// # Errors
    /// [`SupervisorError::AlreadyRunning`] for a refused start,
    /// [`SupervisorError::Spawn`] if the process could not be created.
    pub async fn start(&self, update: &ChildConfig) -> Result<StartResponse> {
        let _op = self.op.lock().await;
        self.state.lock().epoch += 1;
        self.start_locked(update).await
    }

    /// Stops the process gracefully, force-killing after the group's
    /// graceful timeout. Stopping a stopped child is a no-op.
    ///
    /// # Errors
    /// Never fails for a stopped child.
    pub async fn stop(&self, update: &ChildConfig) -> Result<StopResponse> {
        let _op = self.op.lock().await;
        {
            let mut st = self.state.lock();
            st.epoch += 1;
            st.config = st.config.merged(update);
        }
        self.stop_locked().await
    }

    /// Rotates the log files without stopping the process.
    ///
    /// Returns the archive paths; both are `None` when log capture is off.
    ///
    /// # Errors
    /// Returns an error if the log layer fails.
    pub async fn rotate_logs(&self) -> Result<RotatedLogs> {
        let _op = self.op.lock().await;
        let Some(logs) = &self.logs else {
            return Ok(RotatedLogs::default());
        };
        logs.rotate(self.is_running()).await
    }

    /// Snapshot of state, with resource usage of the live process.
    #[must_use]
    pub fn info(&self) -> ChildInfo {
        let (status, pid, crash_count, errors, config) = {
            let st = self.state.lock();
            let pid = if st.is_running() {
                st.process.as_ref().and_then(|p| p.pid())
            } else {
                None
            };
            (st.status, pid, st.crash_count, st.errors.clone(), st.config.clone())
        };
        let resources = pid.and_then(|pid| self.monitor.lock().sample(pid).ok());
        ChildInfo {
            group: self.group.name.clone(),
            port: self.port,
            status,
            status_code: status.code(),
            pid,
            crash_count,
            errors,
            config,
            resources,
        }
    }

    /// Sends a JSON value to the live process.
    ///
    /// # Errors
    /// Returns an error if the child is not running.
    pub fn send(&self, payload: &serde_json::Value) -> Result<()> {
        self.running_handle()?.send(payload)
    }

    /// Sends `value` if the child is running. Returns whether it was sent.
    pub fn deliver<T: Serialize>(&self, value: &T) -> bool {
        match self.running_handle() {
            Ok(handle) => match handle.send(value) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(group = %self.group.name, port = self.port, error = %e, "delivery failed");
                    false
                }
            },
            Err(_) => false,
        }
    }

    /// Detaches every listener. Only legal while not running.
    ///
    /// # Errors
    /// Returns [`SupervisorError::State`] if the child is running.
    pub fn destroy(&self) -> Result<()> {
        {
            let mut st = self.state.lock();
            if st.is_running() {
                return Err(SupervisorError::state(format!(
                    "cannot destroy {}:{} while it is running",
                    self.group.name, self.port
                )));
            }
            st.destroyed = true;
        }
        self.bus.destroy();
        Ok(())
    }

    fn running_handle(&self) -> Result<Arc<ProcessHandle>> {
        let st = self.state.lock();
        match &st.process {
            Some(handle) if st.is_running() => Ok(Arc::clone(handle)),
            _ => Err(SupervisorError::state(format!(
                "{}:{} is not running",
                self.group.name, self.port
            ))),
        }
    }

    fn event_info(&self) -> EventInfo {
        EventInfo::child(self.group.name.clone(), self.port)
    }

    async fn start_locked(&self, update: &ChildConfig) -> Result<StartResponse> {
        let config = {
            let mut st = self.state.lock();
            st.config = st.config.merged(update);
            st.config.clone()
        };
        let mut response = StartResponse {
            config: config.clone(),
            ..StartResponse::default()
        };

        if self.is_running() {
            if config.if_not_running() {
                return Ok(response);
            }
            if !config.wants_restart() {
                return Err(SupervisorError::already_running(&self.group.name, self.port));
            }
            let stopped = self.stop_locked().await?;
            response.restarted = true;
            response.force_restarted = stopped.forced;
        }

        if self.rotate_on_start {
            if let Some(logs) = &self.logs {
                if let Err(e) = logs.rotate(false).await {
                    tracing::warn!(group = %self.group.name, port = self.port, error = %e, "rotate on start failed");
                }
            }
        }

        self.state.lock().status = Status::Starting;
        let (handle, watch) = match self.spawn_process(&config).await {
            Ok(spawned) => spawned,
            Err(e) => return Err(self.fail_spawn(e)),
        };
        {
            let mut st = self.state.lock();
            if let Some(old) = st.process.replace(Arc::clone(&handle)) {
                old.detach_logs();
            }
        }
        self.monitor.lock().reset();

        let (claim, mut rx) = Claim::pair();
        let listeners = start_listeners(&claim);
        for (name, listener) in &listeners {
            self.bus.attach(*name, Arc::clone(listener));
        }
        self.watch(Arc::clone(&handle), watch);

        let outcome = match tokio::time::timeout(self.group.init_timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => StartOutcome::TimedOut,
            Err(_) => {
                claim.fire(StartOutcome::TimedOut);
                rx.await.unwrap_or(StartOutcome::TimedOut)
            }
        };
        for (name, listener) in &listeners {
            self.bus.detach(name, listener);
        }

        match outcome {
            StartOutcome::Ready => {
                response.started = true;
                response.ready = true;
                self.mark_running(&handle);
            }
            StartOutcome::TimedOut => {
                response.started = true;
                self.mark_running(&handle);
            }
            StartOutcome::Exited => {
                response.crashed = true;
                tracing::warn!(group = %self.group.name, port = self.port, "exited before ready");
            }
            StartOutcome::Failed(error) => return Err(SupervisorError::spawn(error)),
        }
        Ok(response)
    }

    async fn spawn_process(&self, config: &ChildConfig) -> Result<(Arc<ProcessHandle>, ProcessWatch)> {
        let Some(logs) = &self.logs else {
            return ProcessHandle::spawn(&self.group, config, None);
        };
        let mut owner = logs.owner().await;
        owner.open().await?;
        let spawned = ProcessHandle::spawn(&self.group, config, Some(logs))?;
        owner.assign(spawned.0.id());
        Ok(spawned)
    }

    /// Records a spawn failure and reports it as an already-handled error
    /// event; the failure goes back to the caller.
    fn fail_spawn(&self, error: SupervisorError) -> SupervisorError {
        let message = error.to_string();
        {
            let mut st = self.state.lock();
            st.record_error(message.clone());
            st.status = Status::Error;
        }
        tracing::error!(group = %self.group.name, port = self.port, error = %message, "spawn failed");
        let mut info = self.event_info();
        info.handled = true;
        self.bus
            .invoke(event::ERROR, &mut info, &EventData::Error { error: message });
        error
    }

    fn mark_running(&self, handle: &Arc<ProcessHandle>) {
        let mut st = self.state.lock();
        if st.status == Status::Starting && st.is_current(handle) {
            st.status = Status::Running;
            tracing::info!(group = %self.group.name, port = self.port, pid = handle.pid().unwrap_or(0), "running");
        }
    }

    async fn stop_locked(&self) -> Result<StopResponse> {
        let (claim, mut rx) = Claim::pair();
        let listeners = stop_listeners(&claim);
        for (name, listener) in &listeners {
            self.bus.attach(*name, Arc::clone(listener));
        }

        let (handle, config) = {
            let mut st = self.state.lock();
            let handle = if st.is_running() {
                st.status = Status::Stopping;
                st.process.clone()
            } else {
                None
            };
            (handle, st.config.clone())
        };
        let mut response = StopResponse {
            config,
            ..StopResponse::default()
        };
        let Some(handle) = handle else {
            for (name, listener) in &listeners {
                self.bus.detach(name, listener);
            }
            return Ok(response);
        };

        let method = stop_method_for(cfg!(windows), self.group.use_message_on_windows);
        let requested = match method {
            StopMethod::Signal => handle.signal(self.group.graceful_signal),
            StopMethod::Message => handle.send(&self.group.graceful_signal.name()),
        };
        if let Err(e) = requested {
            tracing::warn!(group = %self.group.name, port = self.port, error = %e, "graceful stop request failed");
        }
        tracing::info!(
            group = %self.group.name,
            port = self.port,
            signal = %self.group.graceful_signal,
            timeout = ?self.group.graceful_timeout,
            "stopping"
        );

        let deadline = Instant::now() + self.group.graceful_timeout;
        loop {
            match rx.try_recv() {
                Ok(()) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Empty) => {}
            }
            // Only the handle this stop started with may be killed.
            if !response.forced && Instant::now() >= deadline && handle.is_connected() {
                response.forced = true;
                tracing::warn!(group = %self.group.name, port = self.port, "graceful timeout elapsed, force-killing");
                if let Err(e) = handle.signal(Signal::Kill) {
                    tracing::warn!(group = %self.group.name, port = self.port, error = %e, "force kill failed");
                }
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        for (name, listener) in &listeners {
            self.bus.detach(name, listener);
        }
        response.stopped = true;
        Ok(response)
    }

    /// Spawns the tasks that turn channel lines and the exit into events.
    fn watch(&self, handle: Arc<ProcessHandle>, watch: ProcessWatch) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let ProcessWatch { mut process, inbox } = watch;

        let reader = inbox.map(|mut inbox| {
            let this = Arc::clone(&this);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                loop {
                    match inbox.next_line().await {
                        Ok(Some(line)) => this.handle_message(&handle, &line),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(error = %e, "channel read failed");
                            break;
                        }
                    }
                }
            })
        });

        tokio::spawn(async move {
            let waited = process.wait().await;
            // Reaped: the pid may be reused from here on, so no more signals.
            handle.mark_exited();
            if let Some(mut reader) = reader {
                if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
                    reader.abort();
                }
            }
            handle.drain_logs(LOG_DRAIN_GRACE).await;
            match waited {
                Ok(status) => this.handle_exit(&handle, ExitOutcome::from(status)).await,
                Err(e) => this.handle_error(&handle, e.to_string()).await,
            }
        });
    }

    fn handle_message(&self, handle: &Arc<ProcessHandle>, line: &str) {
        if !self.state.lock().is_current(handle) {
            return;
        }
        let mut info = self.event_info();
        match decode_line(line, self.group.ready_event.as_deref()) {
            Inbound::Ready => {
                tracing::debug!(group = %self.group.name, port = self.port, "ready");
                self.bus.invoke(event::READY, &mut info, &EventData::None);
            }
            Inbound::Broadcast {
                event,
                data,
                include_self,
            } => {
                let data = EventData::Broadcast {
                    event,
                    data,
                    include_self,
                };
                self.bus.invoke(event::BROADCAST, &mut info, &data);
            }
            Inbound::Message(payload) => {
                self.bus
                    .invoke(event::MESSAGE, &mut info, &EventData::Message { payload });
            }
        }
    }

    async fn handle_exit(&self, handle: &Arc<ProcessHandle>, outcome: ExitOutcome) {
        let (expected, epoch) = {
            let mut st = self.state.lock();
            if !st.is_current(handle) {
                tracing::debug!(group = %self.group.name, port = self.port, "ignoring exit of replaced process");
                return;
            }
            let prior = st.status;
            let expected = prior == Status::Stopping;
            if !expected && prior != Status::Starting {
                st.crash_count += 1;
            }
            st.status = Status::Stopped;
            st.process = None;
            (expected, st.epoch)
        };

        if expected {
            tracing::info!(group = %self.group.name, port = self.port, code = ?outcome.code, signal = ?outcome.signal, "stopped");
        } else {
            tracing::warn!(group = %self.group.name, port = self.port, code = ?outcome.code, signal = ?outcome.signal, "exited unexpectedly");
        }

        let mut info = self.event_info();
        let data = EventData::Exit {
            code: outcome.code,
            signal: outcome.signal,
            expected,
        };
        self.bus.invoke(event::EXIT, &mut info, &data);

        if let Some(logs) = &self.logs {
            logs.release(handle.id()).await;
        }

        if !info.handled {
            if let Some(this) = self.this.upgrade() {
                tokio::spawn(async move { this.auto_restart(epoch).await });
            }
        }
    }

    async fn handle_error(&self, handle: &Arc<ProcessHandle>, error: String) {
        {
            let mut st = self.state.lock();
            if !st.is_current(handle) {
                return;
            }
            st.record_error(error.clone());
            st.status = Status::Error;
            st.process = None;
        }
        tracing::error!(group = %self.group.name, port = self.port, error = %error, "process error");

        let mut info = self.event_info();
        self.bus.invoke(event::ERROR, &mut info, &EventData::Error { error });

        if let Some(logs) = &self.logs {
            logs.release(handle.id()).await;
        }
    }

    /// Restarts after an unclaimed exit, unless a command got there first.
    async fn auto_restart(&self, epoch: u64) {
        let _op = self.op.lock().await;
        {
            let st = self.state.lock();
            if st.destroyed || st.epoch != epoch || st.is_running() {
                tracing::debug!(group = %self.group.name, port = self.port, "auto-restart superseded");
                return;
            }
        }
        tracing::info!(group = %self.group.name, port = self.port, "auto-restarting");
        let keep = ChildConfig::new(self.group.name.clone(), self.port);
        if let Err(e) = self.start_locked(&keep).await {
            tracing::warn!(group = %self.group.name, port = self.port, error = %e, "auto-restart failed");
        }
    }
}

fn start_listeners(claim: &Claim<StartOutcome>) -> [(&'static str, Handler); 3] {
    let on_ready = claim.clone();
    let on_exit = claim.clone();
    let on_error = claim.clone();
    [
        (
            event::READY,
            event::handler(move |_, _, _| {
                on_ready.fire(StartOutcome::Ready);
            }),
        ),
        (
            event::EXIT,
            event::handler(move |_, info, _| {
                if on_exit.fire(StartOutcome::Exited) {
                    info.handled = true;
                }
            }),
        ),
        (
            event::ERROR,
            event::handler(move |_, info, data| {
                let error = match data {
                    EventData::Error { error } => error.clone(),
                    _ => "process error".to_string(),
                };
                if on_error.fire(StartOutcome::Failed(error)) {
                    info.handled = true;
                }
            }),
        ),
    ]
}

fn stop_listeners(claim: &Claim<()>) -> [(&'static str, Handler); 2] {
    let on_exit = claim.clone();
    let on_error = claim.clone();
    [
        (
            event::EXIT,
            event::handler(move |_, info, _| {
                if on_exit.fire(()) {
                    info.handled = true;
                }
            }),
        ),
        (
            event::ERROR,
            event::handler(move |_, info, _| {
                if on_error.fire(()) {
                    info.handled = true;
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_method_selection() {
        assert_eq!(stop_method_for(false, false), StopMethod::Signal);
        assert_eq!(stop_method_for(false, true), StopMethod::Signal);
        assert_eq!(stop_method_for(true, false), StopMethod::Signal);
        assert_eq!(stop_method_for(true, true), StopMethod::Message);
    }

    #[test]
    fn test_new_child_is_stopped() {
        let group = Arc::new(GroupConfig::new("web", "/bin/true"));
        let child = Child::new(group, 7000, &EventBus::new(), None, false);
        assert_eq!(child.status(), Status::Stopped);
        assert!(!child.is_running());
        assert_eq!(child.pid(), None);
        assert_eq!(child.config(), ChildConfig::new("web", 7000));
        let info = child.info();
        assert_eq!(info.status_code, 40);
        assert!(info.resources.is_none());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let group = Arc::new(GroupConfig::new("web", "/bin/true"));
        let child = Child::new(group, 7000, &EventBus::new(), None, false);
        let response = child.stop(&ChildConfig::new("web", 7000)).await.unwrap();
        assert!(!response.stopped);
        assert!(!response.forced);
        assert!(child.bus().is_empty(), "stop listeners are detached");
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_error() {
        let group = Arc::new(GroupConfig::new("ghost", "/nonexistent/ghost"));
        let child = Child::new(group, 1, &EventBus::new(), None, false);
        let err = child.start(&ChildConfig::new("ghost", 1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn(_)));
        assert_eq!(child.status(), Status::Error);
        assert_eq!(child.errors().len(), 1);
    }

    #[test]
    fn test_error_log_is_capped() {
        let mut st = ChildState {
            config: ChildConfig::new("g", 1),
            status: Status::Stopped,
            process: None,
            errors: vec![],
            crash_count: 0,
            epoch: 0,
            destroyed: false,
        };
        for i in 0..MAX_ERRORS + 5 {
            st.record_error(i.to_string());
        }
        assert_eq!(st.errors.len(), MAX_ERRORS);
        assert_eq!(st.errors[0], "5");
    }

    #[test]
    fn test_destroy_when_stopped() {
        let group = Arc::new(GroupConfig::new("web", "/bin/true"));
        let parent = EventBus::new();
        let child = Child::new(group, 1, &parent, None, false);
        child.bus().attach("*", event::handler(|_, _, _| {}));
        child.destroy().unwrap();
        assert!(child.bus().is_empty());
    }
}
