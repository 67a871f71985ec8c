//! Core types for child lifecycle management.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// Unique identifier for a supervisor instance.
///
/// Published in the handshake so a subscriber can tell it reached the
/// supervisor it meant to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupervisorId(uuid::Uuid);

impl SupervisorId {
    /// Creates a new random supervisor ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a supervisor ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SupervisorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one spawned OS process.
///
/// A child gets a new handle on every spawn, so late notifications from a
/// replaced process can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(uuid::Uuid);

impl HandleId {
    /// Creates a new random handle ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Child lifecycle state.
///
/// The numeric codes are totally ordered and the order is load-bearing:
/// a child is done stopping once `status >= Stopped`.
///
/// ```text
/// Stopped → Starting → Running → Stopping → Stopped
///              ↓          ↓          ↓
///            Error ←──────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Spawned, waiting for ready or the init timeout.
    Starting = 10,
    /// Running normally.
    Running = 20,
    /// Graceful stop in progress.
    Stopping = 30,
    /// Not running.
    Stopped = 40,
    /// Last spawn or runtime operation failed.
    Error = 50,
    /// Never seen.
    Undefined = 60,
}

impl Status {
    /// Returns the numeric status code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns the status text (`"RUNNING"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Undefined => "UNDEFINED",
        }
    }

    /// Returns true once the child has finished stopping (or never ran).
    #[must_use]
    pub fn is_done(self) -> bool {
        self >= Self::Stopped
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unix-style signals for child control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Signal {
    /// Hangup.
    Hup,
    /// Interrupt.
    Int,
    /// Quit.
    Quit,
    /// Terminate (default graceful stop).
    Term,
    /// Kill (non-ignorable).
    Kill,
    /// User signal 1.
    Usr1,
    /// User signal 2.
    Usr2,
}

impl Signal {
    /// Returns the Unix signal number.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Hup => 1,
            Self::Int => 2,
            Self::Quit => 3,
            Self::Term => 15,
            Self::Kill => 9,
            Self::Usr1 => 10,
            Self::Usr2 => 12,
        }
    }

    /// Creates a signal from a Unix signal number.
    #[must_use]
    pub const fn from_i32(sig: i32) -> Option<Self> {
        match sig {
            1 => Some(Self::Hup),
            2 => Some(Self::Int),
            3 => Some(Self::Quit),
            15 => Some(Self::Term),
            9 => Some(Self::Kill),
            10 => Some(Self::Usr1),
            12 => Some(Self::Usr2),
            _ => None,
        }
    }

    /// Returns the conventional name (`"SIGTERM"`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hup => "SIGHUP",
            Self::Int => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = SupervisorError;

    /// Accepts `"SIGTERM"`, `"TERM"` (any case) or `"15"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(num) = s.parse::<i32>() {
            return Self::from_i32(num)
                .ok_or_else(|| SupervisorError::config(format!("unsupported signal number {num}")));
        }
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" => Ok(Self::Hup),
            "INT" => Ok(Self::Int),
            "QUIT" => Ok(Self::Quit),
            "TERM" => Ok(Self::Term),
            "KILL" => Ok(Self::Kill),
            "USR1" => Ok(Self::Usr1),
            "USR2" => Ok(Self::Usr2),
            _ => Err(SupervisorError::config(format!("unknown signal {s:?}"))),
        }
    }
}

impl TryFrom<String> for Signal {
    type Error = SupervisorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Signal> for String {
    fn from(sig: Signal) -> Self {
        sig.name().to_string()
    }
}

#[cfg(unix)]
impl From<Signal> for nix::sys::signal::Signal {
    fn from(sig: Signal) -> Self {
        use nix::sys::signal::Signal as Nix;
        match sig {
            Signal::Hup => Nix::SIGHUP,
            Signal::Int => Nix::SIGINT,
            Signal::Quit => Nix::SIGQUIT,
            Signal::Term => Nix::SIGTERM,
            Signal::Kill => Nix::SIGKILL,
            Signal::Usr1 => Nix::SIGUSR1,
            Signal::Usr2 => Nix::SIGUSR2,
        }
    }
}
