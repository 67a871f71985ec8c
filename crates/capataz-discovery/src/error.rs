//! Discovery error types.

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A datagram is not a valid heartbeat.
    #[error("malformed heartbeat: {0}")]
    Malformed(String),

    /// The socket could not be bound or joined to the group.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address being bound.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Creates a decode error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}
