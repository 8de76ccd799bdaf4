use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Node state in the execution status tree.
/// Transitions follow `Pending -> Running -> {Completed | Faulted |
/// Cancelled | Skipped}`; there are no back-transitions and no transitions
/// out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Skipped,
    Faulted,
    Cancelled,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Faulted)
                | (Self::Running, Self::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Faulted | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Faulted => "faulted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An error preserved with its cause chain, for embedding in a faulted
/// status node (`Error`/`SerializableError` with nested inner error chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<SerializableError>>,
}

impl SerializableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            inner: None,
        }
    }

    /// Walk a `std::error::Error`'s `source()` chain into nested entries.
    pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            message: err.to_string(),
            inner: err.source().map(|source| Box::new(Self::from_std(source))),
        }
    }
}

/// Serializable snapshot of one node in the execution status tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    pub completion_percentage: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializableError>,
    #[serde(default)]
    pub nodes: Vec<ExecutionStatus>,
    pub state: ExecutionState,
}

struct NodeState {
    name: String,
    description: Option<String>,
    parent_id: Option<String>,
    started: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    completion_percentage: u8,
    message: String,
    error: Option<SerializableError>,
    state: ExecutionState,
}

/// Live, concurrently-updatable node in the execution status tree. Each
/// operation (pipeline stage, sequence step) owns one; the tree is walked
/// into an [`ExecutionStatus`] snapshot on demand for reporting.
pub struct StatusNode {
    id: String,
    state: Mutex<NodeState>,
    children: Mutex<Vec<Arc<StatusNode>>>,
}

impl StatusNode {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ulid::Ulid::new().to_string(),
            state: Mutex::new(NodeState {
                name: name.into(),
                description: None,
                parent_id: None,
                started: None,
                updated: None,
                completed: None,
                completion_percentage: 0,
                message: String::new(),
                error: None,
                state: ExecutionState::Pending,
            }),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state.lock().unwrap().state
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.state.lock().unwrap().description = Some(description.into());
    }

    /// Create, register, and return a new child node.
    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<StatusNode> {
        let node = StatusNode::new(name);
        node.state.lock().unwrap().parent_id = Some(self.id.clone());
        self.children.lock().unwrap().push(node.clone());
        node
    }

    /// Attach an already-built status tree (e.g. from a nested sequence or
    /// pipeline run) as a child of this node.
    pub fn adopt(&self, child: Arc<StatusNode>) {
        child.state.lock().unwrap().parent_id = Some(self.id.clone());
        self.children.lock().unwrap().push(child);
    }

    fn transition(&self, next: ExecutionState) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        if !state.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: state.state,
                to: next,
            });
        }
        let now = Utc::now();
        if state.started.is_none() && next == ExecutionState::Running {
            state.started = Some(now);
        }
        if next.is_terminal() {
            state.completed = Some(now);
        }
        state.updated = Some(now);
        state.state = next;
        Ok(())
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.transition(ExecutionState::Running)
    }

    pub fn set_progress(&self, percentage: u8, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.completion_percentage = percentage.min(100);
        state.message = message.into();
        state.updated = Some(Utc::now());
    }

    pub fn complete(&self) -> Result<(), PipelineError> {
        self.transition(ExecutionState::Completed)?;
        self.state.lock().unwrap().completion_percentage = 100;
        Ok(())
    }

    pub fn fault(&self, error: SerializableError) -> Result<(), PipelineError> {
        self.transition(ExecutionState::Faulted)?;
        self.state.lock().unwrap().error = Some(error);
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), PipelineError> {
        self.transition(ExecutionState::Cancelled)
    }

    /// Skip without ever running — valid only from `Pending`. Used both for
    /// an `AddSequence` condition that evaluates false, and for downstream
    /// steps left unrun after an earlier step faulted.
    pub fn skip(&self) -> Result<(), PipelineError> {
        self.transition(ExecutionState::Skipped)
    }

    pub fn snapshot(&self) -> ExecutionStatus {
        let state = self.state.lock().unwrap();
        let nodes = self.children.lock().unwrap().iter().map(|child| child.snapshot()).collect();
        ExecutionStatus {
            id: self.id.clone(),
            name: state.name.clone(),
            description: state.description.clone(),
            parent_id: state.parent_id.clone(),
            started: state.started,
            updated: state.updated,
            completed: state.completed,
            completion_percentage: state.completion_percentage,
            message: state.message.clone(),
            error: state.error.clone(),
            nodes,
            state: state.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_running_to_completed() {
        let node = StatusNode::new("step");
        assert_eq!(node.state(), ExecutionState::Pending);
        node.start().unwrap();
        assert_eq!(node.state(), ExecutionState::Running);
        node.complete().unwrap();
        assert_eq!(node.state(), ExecutionState::Completed);
    }

    #[test]
    fn no_back_transition_from_terminal() {
        let node = StatusNode::new("step");
        node.start().unwrap();
        node.complete().unwrap();
        assert!(node.start().is_err());
    }

    #[test]
    fn skip_only_valid_from_pending() {
        let node = StatusNode::new("step");
        assert!(node.skip().is_ok());
        let node2 = StatusNode::new("step2");
        node2.start().unwrap();
        assert!(node2.skip().is_err());
    }

    #[test]
    fn child_is_linked_to_parent_and_snapshot_nests() {
        let root = StatusNode::new("root");
        let child = root.child("child");
        child.start().unwrap();
        let snapshot = root.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].parent_id.as_deref(), Some(root.id()));
    }

    #[test]
    fn fault_carries_error_chain() {
        let node = StatusNode::new("step");
        node.start().unwrap();
        let err = SerializableError {
            message: "outer".to_string(),
            inner: Some(Box::new(SerializableError::new("inner"))),
        };
        node.fault(err).unwrap();
        let snapshot = node.snapshot();
        assert_eq!(snapshot.error.unwrap().inner.unwrap().message, "inner");
    }
}
