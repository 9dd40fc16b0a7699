//! Saga checkpoint store trait.

use async_trait::async_trait;
use common::{RunId, Version, WorkflowId};

use crate::aggregate::SagaInstance;
use crate::error::Result;
use crate::events::SagaEvent;
use crate::state::SagaStatus;

/// The recorded history of the latest run of a workflow.
#[derive(Debug, Clone)]
pub struct SagaHistory {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub workflow_type: String,
    pub events: Vec<SagaEvent>,
    pub version: Version,
    pub status: SagaStatus,
}

impl SagaHistory {
    pub fn instance(&self) -> Result<SagaInstance> {
        SagaInstance::replay(&self.events)
    }
}

/// Append-only storage for saga checkpoints.
///
/// Each workflow id has one status row pointing at its latest run. Appends
/// are guarded by the run's version so only one writer wins.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Appends `events` to the run and updates the status row.
    ///
    /// With `expected == Version::initial()` the append opens a new run and
    /// succeeds only if the workflow has no run or its latest run is
    /// terminal; otherwise `AlreadyStarted` is returned. For an existing run
    /// the run id and version must match, else `ConcurrencyConflict`.
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
        expected: Version,
        events: &[SagaEvent],
        status: SagaStatus,
    ) -> Result<Version>;

    /// Loads the latest run of a workflow.
    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<SagaHistory>>;

    /// Workflow ids whose latest run is in one of `statuses`.
    async fn find_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<WorkflowId>>;
}
