//! Workflow definitions: pure decision functions over a saga instance.

use std::time::Duration;

use common::WorkflowId;
use serde_json::Value;

use crate::activity::{ActivityCall, ActivityOptions};
use crate::aggregate::{CompletedStep, SagaFailure, SagaInstance};
use crate::error::Result;
use crate::events::FailureKind;
use crate::payload::Payload;

/// What the engine should do next for a running saga.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Invoke an activity. A `best_effort` step that fails is recorded as
    /// skipped and the saga carries on.
    Execute {
        step: String,
        call: ActivityCall,
        options: ActivityOptions,
        best_effort: bool,
    },
    /// Record a step outcome without calling anything.
    Record { step: String, output: Value },
    /// Suspend until the named signal arrives or `timeout` elapses.
    AwaitSignal {
        step: String,
        signal: String,
        timeout: Duration,
    },
    /// Close the saga as completed with this result.
    Complete { result: Value },
}

impl Decision {
    pub fn execute(step: impl Into<String>, call: ActivityCall, options: ActivityOptions) -> Self {
        Decision::Execute {
            step: step.into(),
            call,
            options,
            best_effort: false,
        }
    }

    pub fn best_effort(step: impl Into<String>, call: ActivityCall, options: ActivityOptions) -> Self {
        Decision::Execute {
            step: step.into(),
            call,
            options,
            best_effort: true,
        }
    }

    pub fn step(&self) -> Option<&str> {
        match self {
            Decision::Execute { step, .. }
            | Decision::Record { step, .. }
            | Decision::AwaitSignal { step, .. } => Some(step),
            Decision::Complete { .. } => None,
        }
    }
}

/// The inverse activity declared for a completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct Compensation {
    pub call: ActivityCall,
    pub options: ActivityOptions,
}

/// A saga definition.
///
/// `decide` must depend only on the input and the replayed instance: it is
/// called again after every checkpoint and after a restart, and has to land
/// on the same step each time.
pub trait Workflow: Send + Sync + 'static {
    type Input: Payload;

    fn workflow_type(&self) -> &'static str;

    fn workflow_id(&self, input: &Self::Input) -> WorkflowId;

    fn decide(&self, input: &Self::Input, saga: &SagaInstance) -> Result<Decision>;

    /// The inverse of a completed step, or `None` if it needs no undoing.
    fn compensation(
        &self,
        input: &Self::Input,
        step: &CompletedStep,
        failure: &SagaFailure,
    ) -> Result<Option<Compensation>>;

    /// Human-readable reason recorded for a failed step.
    fn failure_reason(
        &self,
        _input: &Self::Input,
        step: &str,
        kind: FailureKind,
        cause: &str,
    ) -> String {
        format!("step {step} failed ({kind}): {cause}")
    }
}
