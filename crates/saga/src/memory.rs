use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{RunId, Version, WorkflowId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::state::SagaStatus;
use crate::store::{SagaHistory, SagaStore};

#[derive(Debug, Clone)]
struct Run {
    run_id: RunId,
    workflow_type: String,
    events: Vec<SagaEvent>,
    status: SagaStatus,
}

impl Run {
    fn version(&self) -> Version {
        Version::initial().advance(self.events.len())
    }
}

/// In-memory saga store for tests and single-process runs.
///
/// Survives engine restarts as long as the same store value is shared,
/// which is how recovery is exercised in tests.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    runs: Arc<RwLock<HashMap<WorkflowId, Run>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workflows with at least one run.
    pub async fn workflow_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

fn workflow_type_of(events: &[SagaEvent]) -> Option<String> {
    match events.first() {
        Some(SagaEvent::SagaStarted(data)) => Some(data.workflow_type.clone()),
        _ => None,
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
        expected: Version,
        events: &[SagaEvent],
        status: SagaStatus,
    ) -> Result<Version> {
        let mut runs = self.runs.write().await;

        if expected == Version::initial() {
            if let Some(existing) = runs.get(workflow_id)
                && !existing.status.is_terminal()
            {
                return Err(SagaError::AlreadyStarted {
                    workflow_id: workflow_id.clone(),
                    run_id: existing.run_id,
                });
            }
            let workflow_type = workflow_type_of(events).ok_or_else(|| {
                SagaError::CorruptHistory("a new run must begin with SagaStarted".into())
            })?;
            let run = Run {
                run_id,
                workflow_type,
                events: events.to_vec(),
                status,
            };
            let version = run.version();
            runs.insert(workflow_id.clone(), run);
            return Ok(version);
        }

        let run = runs
            .get_mut(workflow_id)
            .ok_or_else(|| SagaError::NotFound(workflow_id.clone()))?;
        let actual = run.version();
        if run.run_id != run_id || actual != expected {
            return Err(SagaError::ConcurrencyConflict {
                workflow_id: workflow_id.clone(),
                expected,
                actual,
            });
        }

        run.events.extend_from_slice(events);
        run.status = status;
        Ok(run.version())
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<SagaHistory>> {
        let runs = self.runs.read().await;
        Ok(runs.get(workflow_id).map(|run| SagaHistory {
            workflow_id: workflow_id.clone(),
            run_id: run.run_id,
            workflow_type: run.workflow_type.clone(),
            events: run.events.clone(),
            version: run.version(),
            status: run.status,
        }))
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<WorkflowId>> {
        let runs = self.runs.read().await;
        let mut ids: Vec<WorkflowId> = runs
            .iter()
            .filter(|(_, run)| statuses.contains(&run.status))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(workflow_id: &WorkflowId, run_id: RunId) -> SagaEvent {
        SagaEvent::saga_started(workflow_id.clone(), run_id, "planning", json!({}))
    }

    #[tokio::test]
    async fn append_and_load_latest_run() {
        let store = InMemorySagaStore::new();
        let wf = WorkflowId::new("planning-ORD-1");
        let run_id = RunId::new();

        let v1 = store
            .append(&wf, run_id, Version::initial(), &[started(&wf, run_id)], SagaStatus::Running)
            .await
            .unwrap();
        let v2 = store
            .append(
                &wf,
                run_id,
                v1,
                &[SagaEvent::step_started("reserve_units", "reserve_units")],
                SagaStatus::Running,
            )
            .await
            .unwrap();
        assert_eq!(v2, Version::new(2));

        let history = store.load(&wf).await.unwrap().unwrap();
        assert_eq!(history.events.len(), 2);
        assert_eq!(history.workflow_type, "planning");
        assert_eq!(history.instance().unwrap().version(), v2);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = InMemorySagaStore::new();
        let wf = WorkflowId::new("planning-ORD-2");
        let run_id = RunId::new();
        store
            .append(&wf, run_id, Version::initial(), &[started(&wf, run_id)], SagaStatus::Running)
            .await
            .unwrap();

        let result = store
            .append(
                &wf,
                run_id,
                Version::new(5),
                &[SagaEvent::saga_closed(SagaStatus::Failed)],
                SagaStatus::Failed,
            )
            .await;
        assert!(matches!(result, Err(SagaError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn open_run_blocks_restart_but_closed_run_allows_it() {
        let store = InMemorySagaStore::new();
        let wf = WorkflowId::new("planning-ORD-3");
        let first = RunId::new();
        let v = store
            .append(&wf, first, Version::initial(), &[started(&wf, first)], SagaStatus::Running)
            .await
            .unwrap();

        let second = RunId::new();
        let result = store
            .append(&wf, second, Version::initial(), &[started(&wf, second)], SagaStatus::Running)
            .await;
        assert!(matches!(result, Err(SagaError::AlreadyStarted { run_id, .. }) if run_id == first));

        store
            .append(&wf, first, v, &[SagaEvent::saga_closed(SagaStatus::Failed)], SagaStatus::Failed)
            .await
            .unwrap();
        store
            .append(&wf, second, Version::initial(), &[started(&wf, second)], SagaStatus::Running)
            .await
            .unwrap();

        let history = store.load(&wf).await.unwrap().unwrap();
        assert_eq!(history.run_id, second);
        assert_eq!(store.find_by_status(&SagaStatus::open()).await.unwrap(), vec![wf]);
    }
}
