use thiserror::Error;

use crate::status::ExecutionState;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: ExecutionState, to: ExecutionState },

    #[error("stage '{stage}' faulted: {message}")]
    StageFaulted { stage: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    /// Raised by an operation inside a pipeline stage or sequence step;
    /// faults that stage and propagates to the caller via `execute`.
    #[error("{0}")]
    Application(String),
}

impl PipelineError {
    pub fn application(err: impl std::fmt::Display) -> Self {
        Self::Application(err.to_string())
    }
}
