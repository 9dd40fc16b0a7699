//! Saga status machine.

use serde::{Deserialize, Serialize};

/// Where a saga instance stands in its lifecycle.
///
/// ```text
/// Running ◄──► WaitingSignal
///    │               │
///    ├──► Completed  │
///    └──► Compensating ◄┘ ──┬──► Compensated
///                           └──► Failed
/// ```
///
/// A failure with nothing to compensate goes straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    #[default]
    Running,
    WaitingSignal,
    Compensating,
    Completed,
    Failed,
    Compensated,
}

impl SagaStatus {
    /// Returns true if the instance is closed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    /// Returns true if the instance has nothing to do until something
    /// external happens.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == SagaStatus::WaitingSignal
    }

    /// Statuses the recovery scan resumes.
    pub fn open() -> [SagaStatus; 3] {
        [
            SagaStatus::Running,
            SagaStatus::WaitingSignal,
            SagaStatus::Compensating,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "running",
            SagaStatus::WaitingSignal => "waiting_signal",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensated => "compensated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let status = match value {
            "running" => SagaStatus::Running,
            "waiting_signal" => SagaStatus::WaitingSignal,
            "compensating" => SagaStatus::Compensating,
            "completed" => SagaStatus::Completed,
            "failed" => SagaStatus::Failed,
            "compensated" => SagaStatus::Compensated,
            _ => return None,
        };
        Some(status)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::WaitingSignal.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
    }

    #[test]
    fn waiting_is_settled_but_not_terminal() {
        assert!(SagaStatus::WaitingSignal.is_settled());
        assert!(!SagaStatus::Compensating.is_settled());
    }

    #[test]
    fn string_form_round_trips_and_matches_serde() {
        for status in [
            SagaStatus::Running,
            SagaStatus::WaitingSignal,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Some(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        assert_eq!(SagaStatus::parse("paused"), None);
    }
}
