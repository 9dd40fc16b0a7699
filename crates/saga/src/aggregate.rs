//! Saga instance rebuilt from its checkpoint history.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{RunId, Version, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SagaError;
use crate::events::{FailureKind, SagaEvent};
use crate::signal::Signal;
use crate::state::SagaStatus;

/// A step that finished and may need undoing later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step: String,
    pub activity: Option<String>,
    /// Encoded activity output, or the consumed signal payload for waits.
    pub output: Value,
    pub attempts: u32,
}

/// The original cause of a failed run. Compensation never replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailure {
    pub step: String,
    pub reason: String,
    pub kind: FailureKind,
}

/// An open wait point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    pub step: String,
    pub signal: String,
    pub deadline: DateTime<Utc>,
}

/// Outcome of one inverse activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub step: String,
    pub activity: String,
    pub error: Option<String>,
}

/// One run of a saga.
///
/// Only [`SagaInstance::apply`] mutates it, and `apply` reads nothing but the
/// event, so replaying the same history always yields an equal instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    workflow_id: WorkflowId,
    run_id: RunId,
    workflow_type: String,
    status: SagaStatus,
    current_step: Option<String>,
    completed_steps: Vec<CompletedStep>,
    skipped_steps: Vec<String>,
    input: Value,
    result: Option<Value>,
    failure: Option<SagaFailure>,
    started_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    pending_signals: Vec<Signal>,
    seen_signal_ids: BTreeSet<String>,
    waiting: Option<WaitState>,
    cancellation: Option<String>,
    compensations: Vec<CompensationRecord>,
    version: Version,
}

impl SagaInstance {
    /// Folds a history that starts with `SagaStarted`.
    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a SagaEvent>,
    ) -> Result<Self, SagaError> {
        let mut events = events.into_iter();
        match events.next() {
            Some(first @ SagaEvent::SagaStarted(_)) => {
                let mut saga = SagaInstance::default();
                saga.apply(first.clone());
                for event in events {
                    saga.apply(event.clone());
                }
                Ok(saga)
            }
            Some(other) => Err(SagaError::CorruptHistory(format!(
                "history starts with {}",
                other.event_type()
            ))),
            None => Err(SagaError::CorruptHistory("empty history".into())),
        }
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.workflow_id = data.workflow_id;
                self.run_id = data.run_id;
                self.workflow_type = data.workflow_type;
                self.input = data.input;
                self.started_at = Some(data.started_at);
                self.status = SagaStatus::Running;
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = Some(data.step);
            }
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(CompletedStep {
                    step: data.step,
                    activity: data.activity,
                    output: data.output,
                    attempts: data.attempts,
                });
                self.current_step = None;
            }
            SagaEvent::StepSkipped(data) => {
                self.skipped_steps.push(data.step);
                self.current_step = None;
            }
            SagaEvent::StepFailed(data) => {
                // Status moves with the CompensationStarted/SagaClosed that follows.
                self.current_step = Some(data.step.clone());
                self.failure = Some(SagaFailure {
                    step: data.step,
                    reason: data.reason,
                    kind: data.kind,
                });
            }
            SagaEvent::WaitingForSignal(data) => {
                self.current_step = Some(data.step.clone());
                self.waiting = Some(WaitState {
                    step: data.step,
                    signal: data.signal,
                    deadline: data.deadline,
                });
                self.status = SagaStatus::WaitingSignal;
            }
            SagaEvent::SignalReceived(signal) => {
                if let Some(id) = &signal.dedup_id {
                    self.seen_signal_ids.insert(id.clone());
                }
                self.pending_signals.push(signal);
            }
            SagaEvent::SignalConsumed(data) => {
                if let Some(pos) = self
                    .pending_signals
                    .iter()
                    .position(|s| s.name == data.signal.name)
                {
                    self.pending_signals.remove(pos);
                }
                self.completed_steps.push(CompletedStep {
                    step: data.step,
                    activity: None,
                    output: data.signal.payload,
                    attempts: 1,
                });
                self.current_step = None;
                self.waiting = None;
                self.status = SagaStatus::Running;
            }
            SagaEvent::CancellationRequested(data) => {
                self.cancellation = Some(data.reason);
            }
            SagaEvent::CompensationStarted(_) => {
                self.waiting = None;
                self.status = SagaStatus::Compensating;
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensations.push(CompensationRecord {
                    step: data.step,
                    activity: data.activity,
                    error: None,
                });
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.compensations.push(CompensationRecord {
                    step: data.step,
                    activity: data.activity,
                    error: Some(data.error),
                });
            }
            SagaEvent::SagaCompleted(data) => {
                self.result = Some(data.result);
                self.closed_at = Some(data.completed_at);
                self.current_step = None;
                self.status = SagaStatus::Completed;
            }
            SagaEvent::SagaClosed(data) => {
                self.closed_at = Some(data.closed_at);
                self.waiting = None;
                self.status = data.status;
            }
        }
        self.version = self.version.next();
    }
}

// Query methods
impl SagaInstance {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Steps in completion order.
    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    pub fn completed_step(&self, step: &str) -> Option<&CompletedStep> {
        self.completed_steps.iter().find(|s| s.step == step)
    }

    pub fn skipped_steps(&self) -> &[String] {
        &self.skipped_steps
    }

    /// True if the step completed or was skipped.
    pub fn is_done(&self, step: &str) -> bool {
        self.completed_step(step).is_some() || self.skipped_steps.iter().any(|s| s == step)
    }

    /// Encoded workflow input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&SagaFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Signals received but not yet consumed by a wait point.
    pub fn pending_signals(&self) -> &[Signal] {
        &self.pending_signals
    }

    pub fn pending_signal(&self, name: &str) -> Option<&Signal> {
        self.pending_signals.iter().find(|s| s.name == name)
    }

    pub fn has_seen_signal(&self, dedup_id: &str) -> bool {
        self.seen_signal_ids.contains(dedup_id)
    }

    pub fn waiting(&self) -> Option<&WaitState> {
        self.waiting.as_ref()
    }

    pub fn cancellation(&self) -> Option<&str> {
        self.cancellation.as_deref()
    }

    pub fn compensations(&self) -> &[CompensationRecord] {
        &self.compensations
    }

    pub fn is_compensated(&self, step: &str) -> bool {
        self.compensations.iter().any(|c| c.step == step)
    }

    /// Number of history events folded in.
    pub fn version(&self) -> Version {
        self.version
    }
}
