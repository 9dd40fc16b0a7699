//! Signals: out-of-band messages that resume a saga at a named wait point.

use chrono::{DateTime, Utc};
use common::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signal as recorded in the saga history.
///
/// A signal that arrives before the saga reaches its wait point stays
/// buffered in the instance until consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub payload: Value,
    /// Caller-supplied id; a second signal with the same id is dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>, payload: Value) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            payload,
            dedup_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_dedup_id(mut self, dedup_id: impl Into<String>) -> Self {
        self.dedup_id = Some(dedup_id.into());
        self
    }
}

/// What happened to a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Accepted,
    Duplicate,
}
