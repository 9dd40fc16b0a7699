//! Saga checkpoint events.
//!
//! The history of a run is an append-only list of these. Folding it with
//! [`SagaInstance::apply`](crate::SagaInstance::apply) rebuilds the instance.

use chrono::{DateTime, Utc};
use common::{RunId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signal::Signal;
use crate::state::SagaStatus;

/// Why a step (or the whole saga) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The activity rejected the call.
    Fatal,
    /// Every attempt failed with a retryable error.
    RetriesExhausted,
    /// Every attempt timed out.
    Timeout,
    /// A wait point expired before its signal arrived.
    SignalTimeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fatal => "fatal",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Timeout => "timeout",
            FailureKind::SignalTimeout => "signal_timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    SagaStarted(SagaStartedData),
    StepStarted(StepStartedData),
    StepCompleted(StepCompletedData),
    /// A best-effort step failed; the saga carries on.
    StepSkipped(StepSkippedData),
    StepFailed(StepFailedData),
    WaitingForSignal(WaitingData),
    SignalReceived(Signal),
    /// A buffered signal satisfied a wait point; the wait step is complete.
    SignalConsumed(SignalConsumedData),
    CancellationRequested(CancellationData),
    CompensationStarted(CompensationStartedData),
    CompensationStepCompleted(CompensationStepData),
    CompensationStepFailed(CompensationStepFailedData),
    SagaCompleted(SagaCompletedData),
    /// Closes a failed run as `failed` or `compensated`.
    SagaClosed(SagaClosedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepSkipped(_) => "StepSkipped",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::WaitingForSignal(_) => "WaitingForSignal",
            SagaEvent::SignalReceived(_) => "SignalReceived",
            SagaEvent::SignalConsumed(_) => "SignalConsumed",
            SagaEvent::CancellationRequested(_) => "CancellationRequested",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaClosed(_) => "SagaClosed",
        }
    }

    pub fn saga_started(
        workflow_id: WorkflowId,
        run_id: RunId,
        workflow_type: impl Into<String>,
        input: Value,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            workflow_id,
            run_id,
            workflow_type: workflow_type.into(),
            input,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step: impl Into<String>, activity: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepStartedData {
            step: step.into(),
            activity: activity.into(),
        })
    }

    pub fn step_completed(
        step: impl Into<String>,
        activity: Option<String>,
        output: Value,
        attempts: u32,
    ) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step: step.into(),
            activity,
            output,
            attempts,
        })
    }

    pub fn step_skipped(step: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        SagaEvent::StepSkipped(StepSkippedData {
            step: step.into(),
            reason: reason.into(),
            attempts,
        })
    }

    pub fn step_failed(
        step: impl Into<String>,
        reason: impl Into<String>,
        kind: FailureKind,
        attempts: u32,
    ) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step: step.into(),
            reason: reason.into(),
            kind,
            attempts,
        })
    }

    pub fn waiting_for_signal(
        step: impl Into<String>,
        signal: impl Into<String>,
        deadline: DateTime<Utc>,
    ) -> Self {
        SagaEvent::WaitingForSignal(WaitingData {
            step: step.into(),
            signal: signal.into(),
            deadline,
        })
    }

    pub fn signal_consumed(step: impl Into<String>, signal: Signal) -> Self {
        SagaEvent::SignalConsumed(SignalConsumedData {
            step: step.into(),
            signal,
        })
    }

    pub fn cancellation_requested(reason: impl Into<String>) -> Self {
        SagaEvent::CancellationRequested(CancellationData {
            reason: reason.into(),
            requested_at: Utc::now(),
        })
    }

    pub fn compensation_started(failed_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationStartedData {
            failed_step: failed_step.into(),
        })
    }

    pub fn compensation_step_completed(
        step: impl Into<String>,
        activity: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepCompleted(CompensationStepData {
            step: step.into(),
            activity: activity.into(),
        })
    }

    pub fn compensation_step_failed(
        step: impl Into<String>,
        activity: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(CompensationStepFailedData {
            step: step.into(),
            activity: activity.into(),
            error: error.into(),
        })
    }

    pub fn saga_completed(result: Value) -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            result,
            completed_at: Utc::now(),
        })
    }

    pub fn saga_closed(status: SagaStatus) -> Self {
        SagaEvent::SagaClosed(SagaClosedData {
            status,
            closed_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub workflow_type: String,
    pub input: Value,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStartedData {
    pub step: String,
    pub activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step: String,
    /// `None` for locally recorded steps.
    pub activity: Option<String>,
    pub output: Value,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSkippedData {
    pub step: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step: String,
    pub reason: String,
    pub kind: FailureKind,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingData {
    pub step: String,
    pub signal: String,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConsumedData {
    pub step: String,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationData {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStartedData {
    pub failed_step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStepData {
    pub step: String,
    pub activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStepFailedData {
    pub step: String,
    pub activity: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaClosedData {
    pub status: SagaStatus,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_tagged_variant() {
        let event = SagaEvent::step_failed(
            "reserve_inventory",
            "insufficient stock",
            FailureKind::Fatal,
            1,
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "StepFailed");
        assert_eq!(json["data"]["kind"], "fatal");
        assert_eq!(event.event_type(), "StepFailed");

        let back: SagaEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
