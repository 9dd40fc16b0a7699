//! Compensation manager: picks the next inverse activity to run.
//!
//! Compensation walks completed steps newest first. Each inverse is recorded
//! as completed or failed before the next one is chosen, so after a restart
//! the walk resumes where it stopped and never runs an inverse twice.

use crate::aggregate::{SagaFailure, SagaInstance};
use crate::error::{Result, SagaError};
use crate::state::SagaStatus;
use crate::workflow::{Compensation, Workflow};

/// The next inverse activity to invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCompensation {
    pub step: String,
    pub compensation: Compensation,
}

/// Returns the most recently completed step that declares an inverse and
/// has not been compensated yet.
pub fn next_pending<W: Workflow>(
    workflow: &W,
    input: &W::Input,
    saga: &SagaInstance,
    failure: &SagaFailure,
) -> Result<Option<PendingCompensation>> {
    for completed in saga.completed_steps().iter().rev() {
        if saga.is_compensated(&completed.step) {
            continue;
        }
        if let Some(compensation) = workflow.compensation(input, completed, failure)? {
            return Ok(Some(PendingCompensation {
                step: completed.step.clone(),
                compensation,
            }));
        }
    }
    Ok(None)
}

/// Like [`next_pending`] for a saga in `Compensating`, whose failure must
/// already be recorded.
pub fn next_for<W: Workflow>(
    workflow: &W,
    input: &W::Input,
    saga: &SagaInstance,
) -> Result<Option<PendingCompensation>> {
    let failure = saga.failure().ok_or_else(|| {
        SagaError::CorruptHistory(format!(
            "{} is compensating without a recorded failure",
            saga.workflow_id()
        ))
    })?;
    next_pending(workflow, input, saga, failure)
}

/// Status a failed saga closes with once no compensation is pending.
///
/// `Compensated` only if at least one inverse ran and all of them succeeded.
pub fn final_status(saga: &SagaInstance) -> SagaStatus {
    let records = saga.compensations();
    if !records.is_empty() && records.iter().all(|r| r.error.is_none()) {
        SagaStatus::Compensated
    } else {
        SagaStatus::Failed
    }
}
