use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
