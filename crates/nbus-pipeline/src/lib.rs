mod error;
mod pipeline;
mod sequence;
mod status;

pub use error::PipelineError;
pub use pipeline::{PipelineBuilder, PipelineExecutor, PipelineRun};
pub use sequence::{SequenceBuilder, SequenceExecutor, SequenceRun};
pub use status::{ExecutionState, ExecutionStatus, SerializableError, StatusNode};
