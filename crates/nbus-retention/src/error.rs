use nbus_core::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("lock: {0}")]
    Lock(String),

    #[error("{0}")]
    Other(String),
}
