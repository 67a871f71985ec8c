//! Error types for capataz-core.
//!
//! Every command returns its failure to its own caller. Failures with no
//! waiting caller (a background restart) are logged and dropped.

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Malformed group or child configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No group with this name has been prepared.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Start requested on a running child without `restart`.
    #[error("child {group}:{port} is already running")]
    AlreadyRunning {
        /// Group name.
        group: String,
        /// Child port.
        port: u16,
    },

    /// Operation is not legal in the current state.
    #[error("invalid state: {0}")]
    State(String),

    /// The OS refused to create the process, or it failed at runtime.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// Signal delivery failed.
    #[error("signal error: {0}")]
    Signal(String),

    /// Log layer failure.
    #[error("log error: {0}")]
    Log(String),

    /// Event transport failure (handshake missing, wrong supervisor).
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SupervisorError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a state error.
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Creates a signal error.
    #[must_use]
    pub fn signal(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }

    /// Creates a log error.
    #[must_use]
    pub fn log(msg: impl Into<String>) -> Self {
        Self::Log(msg.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates an already-running conflict.
    #[must_use]
    pub fn already_running(group: impl Into<String>, port: u16) -> Self {
        Self::AlreadyRunning {
            group: group.into(),
            port,
        }
    }

    /// Returns true for operational conflicts that left state untouched.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::State(_))
    }

    /// Returns true if this error was raised before any process action.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::GroupNotFound(_))
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
