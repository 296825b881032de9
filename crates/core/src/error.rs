use crate::types::WorkflowId;
use thiserror::Error;

/// Errors surfaced by the workflow engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Invalid workflow {workflow_id}: {reason}")]
    InvalidWorkflow {
        workflow_id: WorkflowId,
        reason: String,
    },
}

/// Failure of a single node attempt; its message is recorded as `last_error`
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Node timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Invalid workflow version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },
}
