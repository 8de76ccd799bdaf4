use thiserror::Error;

/// Errors surfaced by a transport or by bus components sitting directly on top
/// of one. Mirrors the taxonomy in the design: configuration errors are fatal
/// at startup, transient errors are retried, permanent errors propagate, and
/// decode errors never reach here (they resolve to a generic fallback entity
/// instead of an error).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("stream initialization failed after retries: {0}")]
    InitializationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    /// One or more transports failed during a fan-out dispatch. Carries every
    /// failure, not just the first, so a caller can see which transports
    /// handed off and which did not.
    #[error("{} of {total} transports failed: {}", .failures.len(), .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Composite {
        total: usize,
        failures: Vec<TransportError>,
    },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Transient, connection-class errors are the only ones the retry policy
    /// will retry; everything else propagates immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
