use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    EventId, OutboxError, OutboxEvent, Result, Version,
    store::{ClaimRequest, OutboxStore, StateWrite, StoredState},
};

#[derive(Debug, Default)]
struct Tables {
    states: HashMap<(String, String), StoredState>,
    events: Vec<OutboxEvent>,
    next_position: i64,
    fail_next_commit: bool,
}

/// In-memory outbox store for tests and single-process runs.
///
/// State and rows sit behind one lock, which gives `commit` the same
/// all-or-nothing behavior as the PostgreSQL transaction.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `commit` abort after staging its writes, as if the
    /// process crashed before the transaction committed.
    pub async fn fail_next_commit(&self) {
        self.tables.write().await.fail_next_commit = true;
    }

    /// Returns the total number of outbox rows.
    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    /// Returns a copy of every row in write order.
    pub async fn all_events(&self) -> Vec<OutboxEvent> {
        self.tables.read().await.events.clone()
    }
}

fn lease_active(event: &OutboxEvent, now: DateTime<Utc>) -> bool {
    event.claimed_until.is_some_and(|until| until >= now)
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn commit(&self, write: StateWrite, events: Vec<OutboxEvent>) -> Result<Version> {
        let mut tables = self.tables.write().await;

        let key = (write.aggregate_type.clone(), write.aggregate_id.clone());
        let actual = tables
            .states
            .get(&key)
            .map(|s| s.version)
            .unwrap_or(Version::initial());
        if actual != write.expected_version {
            return Err(OutboxError::ConcurrencyConflict {
                aggregate_type: write.aggregate_type,
                aggregate_id: write.aggregate_id,
                expected: write.expected_version,
                actual,
            });
        }

        let mut seen = HashSet::new();
        for event in &events {
            if !seen.insert(event.id) || tables.events.iter().any(|e| e.id == event.id) {
                return Err(OutboxError::DuplicateEvent(event.id));
            }
        }

        // Stage both writes before touching the tables.
        let new_version = actual.next();
        let staged_state = StoredState {
            version: new_version,
            state: write.state,
            updated_at: Utc::now(),
        };
        let mut position = tables.next_position;
        let staged_events: Vec<OutboxEvent> = events
            .into_iter()
            .map(|mut event| {
                position += 1;
                event.position = position;
                event.published_at = None;
                event.retry_count = 0;
                event.claimed_by = None;
                event.claimed_until = None;
                event
            })
            .collect();

        if std::mem::take(&mut tables.fail_next_commit) {
            return Err(OutboxError::Transaction(
                "commit aborted before outbox rows were written".to_string(),
            ));
        }

        tables.states.insert(key, staged_state);
        tables.events.extend(staged_events);
        tables.next_position = position;

        Ok(new_version)
    }

    async fn load_state(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<StoredState>> {
        let tables = self.tables.read().await;
        Ok(tables
            .states
            .get(&(aggregate_type.to_string(), aggregate_id.to_string()))
            .cloned())
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxEvent>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let lease = chrono::Duration::from_std(request.lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let mut order: Vec<usize> = (0..tables.events.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&tables.events[a], &tables.events[b]);
            a.created_at.cmp(&b.created_at).then(a.position.cmp(&b.position))
        });

        let mut leased_keys: HashSet<String> = HashSet::new();
        let mut claimed = Vec::new();
        for idx in order {
            if claimed.len() >= request.limit {
                break;
            }
            let event = &mut tables.events[idx];
            if event.published_at.is_some() {
                continue;
            }
            if lease_active(event, now) {
                leased_keys.insert(event.routing_key.clone());
                continue;
            }
            if event.retry_count >= request.max_retries
                || leased_keys.contains(&event.routing_key)
            {
                continue;
            }

            event.claimed_by = Some(request.publisher_id.clone());
            event.claimed_until = Some(now + lease);
            claimed.push(event.clone());
        }

        Ok(claimed)
    }

    async fn mark_published(&self, id: EventId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.events.iter_mut().find(|e| e.id == id) {
            Some(event) if event.published_at.is_none() => {
                event.published_at = Some(Utc::now());
                event.claimed_by = None;
                event.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(&self, id: EventId, error: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(event) = tables.events.iter_mut().find(|e| e.id == id)
            && event.published_at.is_none()
        {
            event.retry_count += 1;
            event.last_error = Some(error.to_string());
            event.claimed_by = None;
            event.claimed_until = None;
        }
        Ok(())
    }

    async fn release(&self, id: EventId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(event) = tables.events.iter_mut().find(|e| e.id == id) {
            event.claimed_by = None;
            event.claimed_until = None;
        }
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn count_unpublished(&self) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.published_at.is_none())
            .count() as u64)
    }

    async fn read_from(&self, after_position: i64, limit: usize) -> Result<Vec<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.position > after_position)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.events.len();
        tables
            .events
            .retain(|e| !e.published_at.is_some_and(|at| at < cutoff));
        Ok((before - tables.events.len()) as u64)
    }
}
