//! Saga error types.

use common::{RunId, Version, WorkflowId};
use thiserror::Error;

use crate::payload::PayloadError;
use crate::state::SagaStatus;

/// Errors returned by the saga engine and its stores.
///
/// Step failures are not errors here: they are recorded in the history and
/// reported through [`SagaInstance::failure`](crate::SagaInstance::failure).
#[derive(Debug, Error)]
pub enum SagaError {
    /// The workflow id already has an open run.
    #[error("Workflow {workflow_id} is already running as run {run_id}")]
    AlreadyStarted {
        workflow_id: WorkflowId,
        run_id: RunId,
    },

    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    /// The run is closed and accepts no more signals or cancellations.
    #[error("Workflow {workflow_id} is {status}")]
    Closed {
        workflow_id: WorkflowId,
        status: SagaStatus,
    },

    /// Another writer appended to the history first.
    #[error("Concurrency conflict on {workflow_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        workflow_id: WorkflowId,
        expected: Version,
        actual: Version,
    },

    #[error("Invalid workflow input: {0}")]
    InvalidInput(#[from] PayloadError),

    /// The workflow definition could not decide its next step.
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Corrupt saga history: {0}")]
    CorruptHistory(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Store failures that may succeed when the operation is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SagaError::Database(_) | SagaError::ConcurrencyConflict { .. }
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
