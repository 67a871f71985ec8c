//! Observability error types.

/// Result type alias for observe operations.
pub type Result<T> = std::result::Result<T, ObserveError>;

/// Observability errors.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The process is gone or was never there.
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    /// A /proc file could not be parsed.
    #[error("malformed {file}: {reason}")]
    Malformed {
        /// The file being parsed.
        file: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObserveError {
    /// Creates a parse error for the given /proc file.
    #[must_use]
    pub fn malformed(file: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            file,
            reason: reason.into(),
        }
    }
}
