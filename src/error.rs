/// Error taxonomy for workflow definitions and runs
///
/// Definition errors are fatal to a run and never retried. Executor errors
/// abort the run after being recorded on the failing node's log. Storage and
/// serialization errors come from the ledger and workflow store.

use thiserror::Error;

/// Structural problems with a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Every node has at least one incoming connection
    #[error("no start nodes found in workflow")]
    NoStartNodes,

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("node '{node_id}' connects to unknown node '{target}'")]
    UnknownTarget { node_id: String, target: String },

    #[error("node '{node_id}' has unknown type '{type_name}'")]
    UnknownNodeType { node_id: String, type_name: String },

    /// Topological sort found a cycle passing through this node
    #[error("workflow graph contains a cycle through node '{0}'")]
    Cycle(String),
}

/// Errors surfaced by the workflow engine and its ledger
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A node executor failed; the run is aborted
    #[error("node '{node_id}' failed: {message}")]
    Executor { node_id: String, message: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// No execution log with this id is still running
    #[error("no running execution log: {0}")]
    LogNotFound(String),

    #[error("workflow execution cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Build an executor failure for a node
    pub fn executor(node_id: &str, message: impl Into<String>) -> Self {
        Self::Executor {
            node_id: node_id.to_string(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
