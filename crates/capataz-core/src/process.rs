//! One spawned OS process.
//!
//! [`ProcessHandle::spawn`] starts the executable with its channel on fd 3
//! and its stdout/stderr pumped into the child's log sinks. It returns the
//! shared handle (pid, signals, outbound messages) and a [`ProcessWatch`]
//! that the owning child consumes to observe messages and the exit.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{self, CHANNEL_FD, CHANNEL_FD_ENV, GROUP_ENV, PORT_ENV};
use crate::config::{ChildConfig, GroupConfig, spawn_args, spawn_env};
use crate::error::{Result, SupervisorError};
use crate::logs::{ChildLogs, LogStream, pump};
use crate::types::{HandleId, Signal};

/// Line reader over the supervisor's end of the channel.
pub type Inbox = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExitOutcome {
    /// Exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if it was killed.
    pub signal: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Shared view of a running process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: HandleId,
    pid: Option<u32>,
    connected: AtomicBool,
    outbox: Option<mpsc::UnboundedSender<String>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

/// Parts of a spawned process that only its watcher may consume.
pub struct ProcessWatch {
    /// The OS process, for `wait()`.
    pub process: tokio::process::Child,
    /// Incoming channel lines, if the channel was installed.
    pub inbox: Option<Inbox>,
}

impl std::fmt::Debug for ProcessWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWatch")
            .field("pid", &self.process.id())
            .field("has_inbox", &self.inbox.is_some())
            .finish()
    }
}

impl ProcessHandle {
    /// Spawns `group.executable` for `child`.
    ///
    /// With `logs`, stdout and stderr are pumped into the child's sinks;
    /// without, they are discarded.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Spawn`] if the OS refuses to create the
    /// process or the channel cannot be set up.
    pub fn spawn(
        group: &GroupConfig,
        child: &ChildConfig,
        logs: Option<&ChildLogs>,
    ) -> Result<(Arc<Self>, ProcessWatch)> {
        let mut cmd = Command::new(&group.executable);
        cmd.args(spawn_args(group, child))
            .env_clear()
            .envs(spawn_env(std::env::vars_os(), group, child))
            .env(GROUP_ENV, &group.name)
            .env(PORT_ENV, child.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(false);
        if let Some(cwd) = &group.cwd {
            cmd.current_dir(cwd);
        }
        if logs.is_some() {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let channel = install_channel(&mut cmd)?;

        let mut process = cmd.spawn().map_err(|e| {
            SupervisorError::spawn(format!(
                "failed to spawn {}: {e}",
                group.executable.display()
            ))
        })?;
        // The child owns its end now.
        let ours = channel.map(|(ours, theirs)| {
            drop(theirs);
            ours
        });

        let pid = process.id();
        let mut pumps = Vec::with_capacity(2);
        if let Some(logs) = logs {
            if let Some(stdout) = process.stdout.take() {
                pumps.push(tokio::spawn(pump(stdout, logs.sink(LogStream::Out))));
            }
            if let Some(stderr) = process.stderr.take() {
                pumps.push(tokio::spawn(pump(stderr, logs.sink(LogStream::Err))));
            }
        }

        let (outbox, inbox) = match ours {
            Some(stream) => {
                let (reader, writer) = match open_channel(stream) {
                    Ok(halves) => halves,
                    Err(e) => {
                        let _ = process.start_kill();
                        return Err(e);
                    }
                };
                (Some(spawn_writer(writer)), Some(BufReader::new(reader).lines()))
            }
            None => (None, None),
        };

        tracing::info!(
            group = %group.name,
            port = child.port,
            pid = pid.unwrap_or(0),
            "spawned process"
        );

        let handle = Arc::new(Self {
            id: HandleId::new(),
            pid,
            connected: AtomicBool::new(true),
            outbox,
            pumps: Mutex::new(pumps),
        });
        Ok((handle, ProcessWatch { process, inbox }))
    }

    /// Unique identity of this spawn.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// OS process ID.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True from spawn until the exit (or a runtime error) is observed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Records that the process is gone.
    pub fn mark_exited(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Delivers a signal.
    ///
    /// Refused once the exit has been observed, since the pid may already
    /// belong to another process.
    ///
    /// # Errors
    /// Returns an error if the process is gone or the signal is refused.
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| SupervisorError::signal("process has no pid"))?;
        if !self.is_connected() {
            return Err(SupervisorError::signal(format!("process {pid} has already exited")));
        }

        #[cfg(unix)]
        {
            use nix::sys::signal;
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(pid as i32), nix::sys::signal::Signal::from(sig))
                .map_err(|e| SupervisorError::signal(format!("kill({pid}, {sig}) failed: {e}")))?;
            tracing::debug!(pid = pid, signal = %sig, "sent signal");
            Ok(())
        }

        #[cfg(not(unix))]
        {
            Err(SupervisorError::signal(format!(
                "cannot deliver {sig} to {pid}: signals need a unix host"
            )))
        }
    }

    /// Queues one JSON value on the channel.
    ///
    /// # Errors
    /// Returns an error if the process has no channel or it is closed.
    pub fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        let outbox = self
            .outbox
            .as_ref()
            .ok_or_else(|| SupervisorError::state("process has no channel"))?;
        let line = channel::encode_line(value)?;
        outbox
            .send(line)
            .map_err(|_| SupervisorError::state("channel closed"))
    }

    /// Lets the log pumps finish copying buffered output, then stops them.
    pub async fn drain_logs(&self, grace: Duration) {
        let pumps: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pumps.lock());
        for mut pump in pumps {
            if tokio::time::timeout(grace, &mut pump).await.is_err() {
                pump.abort();
            }
        }
    }

    /// Stops the log pumps immediately.
    pub fn detach_logs(&self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }
}

#[cfg(unix)]
type ChannelPair = (std::os::unix::net::UnixStream, std::os::unix::net::UnixStream);
#[cfg(not(unix))]
type ChannelPair = ((), ());

/// Creates a socket pair and arranges for one end to land on fd 3.
#[cfg(unix)]
#[allow(unsafe_code)]
fn install_channel(cmd: &mut Command) -> Result<Option<ChannelPair>> {
    use std::os::fd::AsRawFd;

    let (ours, theirs) = std::os::unix::net::UnixStream::pair()
        .map_err(|e| SupervisorError::spawn(format!("failed to create channel: {e}")))?;
    let fd = theirs.as_raw_fd();
    cmd.env(CHANNEL_FD_ENV, CHANNEL_FD.to_string());

    // SAFETY: the closure runs between fork and exec and only calls dup2
    // and fcntl, both async-signal-safe. `theirs` outlives the spawn call.
    unsafe {
        cmd.pre_exec(move || {
            if fd != CHANNEL_FD && libc::dup2(fd, CHANNEL_FD) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::fcntl(CHANNEL_FD, libc::F_SETFD, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(Some((ours, theirs)))
}

#[cfg(not(unix))]
fn install_channel(_cmd: &mut Command) -> Result<Option<ChannelPair>> {
    Ok(None)
}

#[cfg(unix)]
type ChannelWriter = tokio::net::unix::OwnedWriteHalf;
#[cfg(not(unix))]
type ChannelWriter = tokio::io::Sink;

#[cfg(unix)]
fn open_channel(
    stream: std::os::unix::net::UnixStream,
) -> Result<(Box<dyn AsyncRead + Send + Unpin>, ChannelWriter)> {
    stream.set_nonblocking(true)?;
    let stream = tokio::net::UnixStream::from_std(stream)?;
    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), writer))
}

#[cfg(not(unix))]
fn open_channel(_stream: ()) -> Result<(Box<dyn AsyncRead + Send + Unpin>, ChannelWriter)> {
    Ok((Box::new(tokio::io::empty()), tokio::io::sink()))
}

/// Drains queued lines onto the channel until the handle is dropped or
/// the peer goes away.
fn spawn_writer(mut writer: ChannelWriter) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::debug!(error = %e, "channel write failed");
                break;
            }
        }
    });
    tx
}
