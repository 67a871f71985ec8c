//! Per-process resource sampling via the /proc filesystem.
//!
//! # Visual Management (目で見る管理)
//! Make worker resource usage visible without attaching anything to the
//! worker itself.
//!
//! On Linux the monitor reads:
//! - `/proc/{pid}/stat` - CPU ticks, state, threads
//! - `/proc/{pid}/statm` - resident pages
//!
//! Other platforms get zeroed samples with [`ProcessState::Unknown`].

use std::time::Instant;

use serde::Serialize;

#[cfg(target_os = "linux")]
use crate::error::ObserveError;
use crate::error::Result;

/// Samples one process's CPU and memory usage.
///
/// CPU usage is a delta between two consecutive samples taken by the same
/// monitor, so the first sample after [`ProcessMonitor::new`] or
/// [`ProcessMonitor::reset`] always reports `0.0`.
#[derive(Debug)]
pub struct ProcessMonitor {
    /// Previous CPU mark, tagged with the pid it belongs to.
    last: Option<CpuMark>,
    /// Page size in bytes.
    #[cfg(target_os = "linux")]
    page_size: u64,
    /// Clock ticks per second.
    #[cfg(target_os = "linux")]
    clock_ticks: f64,
}

#[derive(Debug, Clone, Copy)]
struct CpuMark {
    pid: u32,
    ticks: u64,
    at: Instant,
}

impl ProcessMonitor {
    /// Creates a monitor with no previous measurement.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: None,
            #[cfg(target_os = "linux")]
            page_size: sysconf_or(libc::_SC_PAGESIZE, 4096),
            #[cfg(target_os = "linux")]
            clock_ticks: sysconf_or(libc::_SC_CLK_TCK, 100) as f64,
        }
    }

    /// Forgets the previous measurement (use when the process is replaced).
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Samples the given process.
    ///
    /// # Errors
    /// Returns [`crate::ObserveError::ProcessNotFound`] if the process is gone.
    pub fn sample(&mut self, pid: u32) -> Result<ResourceSample> {
        #[cfg(target_os = "linux")]
        {
            self.sample_linux(pid)
        }

        #[cfg(not(target_os = "linux"))]
        {
            self.last = None;
            Ok(ResourceSample::unknown(pid))
        }
    }

    #[cfg(target_os = "linux")]
    fn sample_linux(&mut self, pid: u32) -> Result<ResourceSample> {
        let now = Instant::now();
        let stat = read_proc(pid, "stat").and_then(|content| parse_stat(&content))?;
        let memory_bytes = read_proc(pid, "statm")
            .and_then(|content| parse_statm(&content))?
            .saturating_mul(self.page_size);

        let ticks = stat.utime + stat.stime;
        let cpu_percent = match self.last {
            Some(mark) if mark.pid == pid => {
                cpu_percent(mark.ticks, ticks, now.duration_since(mark.at), self.clock_ticks)
            }
            _ => 0.0,
        };
        self.last = Some(CpuMark { pid, ticks, at: now });

        Ok(ResourceSample {
            pid,
            cpu_percent,
            memory_bytes,
            threads: stat.threads,
            state: stat.state,
        })
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Process ID.
    pub pid: u32,
    /// CPU usage since the previous sample (100 = one core).
    pub cpu_percent: f64,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    /// Thread count.
    pub threads: u32,
    /// Scheduler state.
    pub state: ProcessState,
}

impl ResourceSample {
    /// A zeroed sample for processes that cannot be inspected.
    #[must_use]
    pub const fn unknown(pid: u32) -> Self {
        Self {
            pid,
            cpu_percent: 0.0,
            memory_bytes: 0,
            threads: 0,
            state: ProcessState::Unknown,
        }
    }
}

/// Kernel scheduler state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Running.
    Running,
    /// Sleeping.
    Sleeping,
    /// Uninterruptible disk wait.
    DiskWait,
    /// Zombie.
    Zombie,
    /// Stopped or traced.
    Stopped,
    /// Unknown.
    Unknown,
}

impl ProcessState {
    fn from_code(code: Option<char>) -> Self {
        match code {
            Some('R') => Self::Running,
            Some('S' | 'I') => Self::Sleeping,
            Some('D') => Self::DiskWait,
            Some('Z') => Self::Zombie,
            Some('T' | 't') => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

#[cfg(target_os = "linux")]
#[derive(Debug, PartialEq, Eq)]
struct Stat {
    state: ProcessState,
    utime: u64,
    stime: u64,
    threads: u32,
}

#[cfg(target_os = "linux")]
fn read_proc(pid: u32, file: &str) -> Result<String> {
    std::fs::read_to_string(format!("/proc/{pid}/{file}")).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ObserveError::ProcessNotFound(pid)
        } else {
            ObserveError::Io(e)
        }
    })
}

/// Parses `/proc/{pid}/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
#[cfg(target_os = "linux")]
fn parse_stat(content: &str) -> Result<Stat> {
    let close = content
        .rfind(')')
        .ok_or_else(|| ObserveError::malformed("stat", "no closing paren"))?;
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if fields.len() < 18 {
        return Err(ObserveError::malformed(
            "stat",
            format!("expected at least 18 fields after comm, got {}", fields.len()),
        ));
    }

    let number = |index: usize, name: &str| -> Result<u64> {
        fields[index]
            .parse()
            .map_err(|_| ObserveError::malformed("stat", format!("bad {name}")))
    };

    Ok(Stat {
        state: ProcessState::from_code(fields[0].chars().next()),
        utime: number(11, "utime")?,
        stime: number(12, "stime")?,
        threads: number(17, "num_threads")? as u32,
    })
}

/// Parses `/proc/{pid}/statm`, returning resident pages.
#[cfg(target_os = "linux")]
fn parse_statm(content: &str) -> Result<u64> {
    content
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ObserveError::malformed("statm", "missing resident field"))?
        .parse()
        .map_err(|_| ObserveError::malformed("statm", "bad resident field"))
}

#[cfg(target_os = "linux")]
fn cpu_percent(prev_ticks: u64, ticks: u64, elapsed: std::time::Duration, clock_ticks: f64) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds < 0.001 || ticks < prev_ticks || clock_ticks <= 0.0 {
        return 0.0;
    }
    ((ticks - prev_ticks) as f64 / clock_ticks / seconds) * 100.0
}

#[cfg(target_os = "linux")]
fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no preconditions and only reads system constants.
    #[allow(unsafe_code)]
    let value = unsafe { libc::sysconf(name) };
    u64::try_from(value).ok().filter(|v| *v > 0).unwrap_or(fallback)
}
