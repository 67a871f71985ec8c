//! Per-child log capture and rotation.
//!
//! A child's stdout and stderr are pumped into two [`LogSink`]s. The sinks
//! outlive any one process: rotation swaps the file underneath them while
//! the process keeps writing, and a restart reopens them in place.
//!
//! File naming is owned by a [`LogLayer`]. [`FileLogLayer`] writes
//! `{dir}/{group}_{port}.{out|err}.log` and archives to
//! `{group}_{port}.{stream}.{RFC3339}.log`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, SupervisorError};
use crate::types::HandleId;

/// Which standard stream a log file captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

impl LogStream {
    /// Both streams, stdout first.
    pub const ALL: [Self; 2] = [Self::Out, Self::Err];

    /// File-name tag (`"out"` / `"err"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::Err => "err",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage backend for child logs.
#[async_trait]
pub trait LogLayer: Send + Sync + fmt::Debug {
    /// Path of the active file.
    fn path(&self, group: &str, port: u16, stream: LogStream) -> PathBuf;

    /// Opens the active file for appending, creating it if needed.
    async fn open(&self, group: &str, port: u16, stream: LogStream) -> Result<File>;

    /// Moves the active file aside. Returns the archive path, or `None`
    /// if there was nothing to rotate.
    async fn rotate(&self, group: &str, port: u16, stream: LogStream) -> Result<Option<PathBuf>>;

    /// Deletes archives older than `ttl`. Returns how many were removed.
    async fn prune(&self, _ttl: Duration) -> Result<usize> {
        Ok(0)
    }
}

/// Plain files in one directory.
#[derive(Debug, Clone)]
pub struct FileLogLayer {
    dir: PathBuf,
}

impl FileLogLayer {
    /// Creates a layer writing under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn archive_path(&self, group: &str, port: u16, stream: LogStream, at: SystemTime) -> PathBuf {
        let stamp = humantime::format_rfc3339_seconds(at).to_string();
        let base = format!("{group}_{port}.{stream}.{stamp}");
        let mut candidate = self.dir.join(format!("{base}.log"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}-{n}.log"));
            n += 1;
        }
        candidate
    }
}

/// Timestamp encoded in an archive file name, if `name` is one.
fn archive_timestamp(name: &str) -> Option<SystemTime> {
    let stem = name.strip_suffix(".log")?;
    let (prefix, stamp) = stem.rsplit_once('.')?;
    if !(prefix.ends_with(".out") || prefix.ends_with(".err")) {
        return None;
    }
    // Collision suffix: "...Z-3".
    let stamp = match stamp.rsplit_once("Z-") {
        Some((head, n)) if n.chars().all(|c| c.is_ascii_digit()) => format!("{head}Z"),
        _ => stamp.to_string(),
    };
    humantime::parse_rfc3339(&stamp).ok()
}

#[async_trait]
impl LogLayer for FileLogLayer {
    fn path(&self, group: &str, port: u16, stream: LogStream) -> PathBuf {
        self.dir.join(format!("{group}_{port}.{stream}.log"))
    }

    async fn open(&self, group: &str, port: u16, stream: LogStream) -> Result<File> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(group, port, stream);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SupervisorError::log(format!("failed to open {}: {e}", path.display())))
    }

    async fn rotate(&self, group: &str, port: u16, stream: LogStream) -> Result<Option<PathBuf>> {
        let active = self.path(group, port, stream);
        if !tokio::fs::try_exists(&active).await? {
            return Ok(None);
        }
        let archive = self.archive_path(group, port, stream, SystemTime::now());
        tokio::fs::rename(&active, &archive).await.map_err(|e| {
            SupervisorError::log(format!("failed to rotate {}: {e}", active.display()))
        })?;
        Ok(Some(archive))
    }

    async fn prune(&self, ttl: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stamp) = name.to_str().and_then(archive_timestamp) else {
                continue;
            };
            let expired = now
                .duration_since(stamp)
                .is_ok_and(|age| age >= ttl);
            if expired {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A swappable log destination shared by a pump and its owner.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    /// Creates a closed sink. Writes to a closed sink are dropped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a file is attached.
    pub async fn is_open(&self) -> bool {
        self.file.lock().await.is_some()
    }

    /// Appends bytes to the current file, if any, and flushes them.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            file.write_all(bytes).await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Flushes and detaches the current file.
    pub async fn close(&self) {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            if let Err(e) = file.flush().await {
                tracing::debug!(error = %e, "log flush failed on close");
            }
        }
    }
}

/// Copies `reader` into `sink` until end of stream.
pub async fn pump<R>(mut reader: R, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write(&buf[..n]).await {
                    tracing::warn!(error = %e, "log write failed");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "log pump read failed");
                break;
            }
        }
    }
}

/// Archive paths produced by one rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotatedLogs {
    /// Archived stdout file.
    pub out: Option<PathBuf>,
    /// Archived stderr file.
    pub err: Option<PathBuf>,
}

/// The two sinks of one child plus the layer that names their files.
///
/// The sinks belong to one process at a time. Opening and assigning happen
/// under the owner lock, and so does [`ChildLogs::release`], so a late exit
/// of an old process never closes files a newer process is writing to.
#[derive(Debug, Clone)]
pub struct ChildLogs {
    layer: Arc<dyn LogLayer>,
    group: String,
    port: u16,
    out: LogSink,
    err: LogSink,
    owner: Arc<Mutex<Option<HandleId>>>,
}

/// Exclusive right to open the sinks and hand them to a new process.
#[derive(Debug)]
pub struct LogOwner<'a> {
    logs: &'a ChildLogs,
    owner: MutexGuard<'a, Option<HandleId>>,
}

impl LogOwner<'_> {
    /// Opens both files.
    pub async fn open(&mut self) -> Result<()> {
        self.logs.open().await
    }

    /// Records which process the sinks now belong to.
    pub fn assign(&mut self, id: HandleId) {
        *self.owner = Some(id);
    }
}

impl ChildLogs {
    /// Creates closed sinks for one child.
    #[must_use]
    pub fn new(layer: Arc<dyn LogLayer>, group: impl Into<String>, port: u16) -> Self {
        Self {
            layer,
            group: group.into(),
            port,
            out: LogSink::new(),
            err: LogSink::new(),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for exclusive ownership of the sinks.
    pub async fn owner(&self) -> LogOwner<'_> {
        LogOwner {
            logs: self,
            owner: self.owner.lock().await,
        }
    }

    /// Closes the sinks if `id` still owns them. Returns whether it did.
    pub async fn release(&self, id: HandleId) -> bool {
        let mut owner = self.owner.lock().await;
        if *owner != Some(id) {
            return false;
        }
        self.close().await;
        *owner = None;
        true
    }

    /// The sink for one stream.
    #[must_use]
    pub fn sink(&self, stream: LogStream) -> LogSink {
        match stream {
            LogStream::Out => self.out.clone(),
            LogStream::Err => self.err.clone(),
        }
    }

    /// Active file path for one stream.
    #[must_use]
    pub fn path(&self, stream: LogStream) -> PathBuf {
        self.layer.path(&self.group, self.port, stream)
    }

    /// Opens both files (no-op for a sink that is already open).
    pub async fn open(&self) -> Result<()> {
        for stream in LogStream::ALL {
            let sink = self.sink(stream);
            let mut guard = sink.file.lock().await;
            if guard.is_none() {
                *guard = Some(self.layer.open(&self.group, self.port, stream).await?);
            }
        }
        Ok(())
    }

    /// Flushes and detaches both files.
    pub async fn close(&self) {
        self.out.close().await;
        self.err.close().await;
    }

    /// Rotates both files.
    ///
    /// Each sink stays locked from detach to reattach, so a pump never
    /// writes into a file that is being renamed. With `reopen`, fresh files
    /// are attached at the original paths.
    pub async fn rotate(&self, reopen: bool) -> Result<RotatedLogs> {
        let mut rotated = RotatedLogs::default();
        for stream in LogStream::ALL {
            let sink = self.sink(stream);
            let mut guard = sink.file.lock().await;
            if let Some(mut file) = guard.take() {
                file.flush().await?;
            }
            let archive = self.layer.rotate(&self.group, self.port, stream).await?;
            if reopen {
                *guard = Some(self.layer.open(&self.group, self.port, stream).await?);
            }
            match stream {
                LogStream::Out => rotated.out = archive,
                LogStream::Err => rotated.err = archive,
            }
        }
        tracing::info!(group = %self.group, port = self.port, "rotated logs");
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> (tempfile::TempDir, Arc<FileLogLayer>) {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(FileLogLayer::new(dir.path().join("logs")));
        (dir, layer)
    }

    #[test]
    fn test_paths() {
        let layer = FileLogLayer::new("/var/log/capataz");
        assert_eq!(
            layer.path("web", 7000, LogStream::Out),
            PathBuf::from("/var/log/capataz/web_7000.out.log")
        );
        assert_eq!(
            layer.path("web", 7000, LogStream::Err),
            PathBuf::from("/var/log/capataz/web_7000.err.log")
        );
    }

    #[test]
    fn test_archive_timestamp_recognition() {
        assert!(archive_timestamp("web_1.out.2020-01-02T03:04:05Z.log").is_some());
        assert!(archive_timestamp("web_1.err.2020-01-02T03:04:05Z-2.log").is_some());
        assert!(archive_timestamp("web_1.out.log").is_none());
        assert!(archive_timestamp("notes.txt").is_none());
        assert!(archive_timestamp("web_1.pid.2020-01-02T03:04:05Z.log").is_none());
    }

    #[tokio::test]
    async fn test_rotate_without_file_is_none() {
        let (_dir, layer) = layer();
        assert!(layer.rotate("web", 1, LogStream::Out).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_moves_and_reopens() {
        let (_dir, layer) = layer();
        let logs = ChildLogs::new(layer.clone(), "web", 1);
        logs.open().await.unwrap();
        logs.sink(LogStream::Out).write(b"before\n").await.unwrap();

        let rotated = logs.rotate(true).await.unwrap();
        let archive = rotated.out.unwrap();
        assert_eq!(tokio::fs::read_to_string(&archive).await.unwrap(), "before\n");
        assert!(rotated.err.is_some(), "empty stderr file is still rotated");

        logs.sink(LogStream::Out).write(b"after\n").await.unwrap();
        logs.close().await;
        let active = tokio::fs::read_to_string(logs.path(LogStream::Out)).await.unwrap();
        assert_eq!(active, "after\n");
    }

    #[tokio::test]
    async fn test_rotate_collision_gets_suffix() {
        let (_dir, layer) = layer();
        let logs = ChildLogs::new(layer.clone(), "web", 2);
        logs.open().await.unwrap();
        let first = logs.rotate(true).await.unwrap().out.unwrap();
        let second = logs.rotate(true).await.unwrap().out.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let (_dir, layer) = layer();
        let logs = ChildLogs::new(layer.clone(), "web", 4);
        let (old, new) = (HandleId::new(), HandleId::new());
        {
            let mut owner = logs.owner().await;
            owner.open().await.unwrap();
            owner.assign(new);
        }

        assert!(!logs.release(old).await, "stale process cannot close");
        assert!(logs.sink(LogStream::Out).is_open().await);
        assert!(logs.release(new).await);
        assert!(!logs.sink(LogStream::Out).is_open().await);
        assert!(!logs.release(new).await, "already released");
    }

    #[tokio::test]
    async fn test_closed_sink_drops_writes() {
        let sink = LogSink::new();
        assert!(!sink.is_open().await);
        sink.write(b"nowhere").await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_copies_until_eof() {
        let (_dir, layer) = layer();
        let logs = ChildLogs::new(layer.clone(), "web", 3);
        logs.open().await.unwrap();
        pump(&b"line one\nline two\n"[..], logs.sink(LogStream::Err)).await;
        logs.close().await;
        let text = tokio::fs::read_to_string(logs.path(LogStream::Err)).await.unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_archives() {
        let (_dir, layer) = layer();
        tokio::fs::create_dir_all(layer.dir()).await.unwrap();
        let old = layer.dir().join("web_1.out.2000-01-01T00:00:00Z.log");
        let active = layer.path("web", 1, LogStream::Out);
        tokio::fs::write(&old, "old").await.unwrap();
        tokio::fs::write(&active, "live").await.unwrap();
        let fresh = layer.rotate("web", 1, LogStream::Out).await.unwrap().unwrap();

        let removed = layer.prune(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_prune_missing_dir() {
        let layer = FileLogLayer::new("/nonexistent/capataz-logs");
        assert_eq!(layer.prune(Duration::ZERO).await.unwrap(), 0);
    }
}
