use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a saga, derived from a business key.
///
/// The same order always maps to the same workflow id, so redelivered
/// trigger events land on the existing instance instead of creating a new one.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a workflow id from a raw string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Builds a workflow id as `<prefix>-<business key>`.
    pub fn for_key(prefix: &str, key: &str) -> Self {
        Self(format!("{prefix}-{key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier of one execution attempt of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Version number used for optimistic concurrency control.
///
/// Starts at 0 for something that has never been written and grows by one
/// per persisted change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of something never persisted.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the version reached after `count` more writes.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_for_key_joins_prefix_and_key() {
        let id = WorkflowId::for_key("planning", "ORD-001");
        assert_eq!(id.as_str(), "planning-ORD-001");
        assert_eq!(id.to_string(), "planning-ORD-001");
    }

    #[test]
    fn workflow_id_serializes_as_plain_string() {
        let id = WorkflowId::new("planning-ORD-9");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"planning-ORD-9\"");
    }

    #[test]
    fn run_id_new_creates_unique_ids() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn version_advances() {
        let v = Version::initial();
        assert_eq!(v.next(), Version::new(1));
        assert_eq!(v.advance(3), Version::new(3));
        assert!(Version::new(2) > Version::new(1));
    }
}
