use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::{EventId, OutboxEvent, Result, Version};

/// A stream of outbox rows in write order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<OutboxEvent>> + Send>>;

/// New aggregate state to persist together with its outbox rows.
#[derive(Debug, Clone)]
pub struct StateWrite {
    pub aggregate_type: String,
    pub aggregate_id: String,

    /// Version the caller loaded. The write is rejected if the stored
    /// version moved in the meantime.
    pub expected_version: Version,

    pub state: serde_json::Value,
}

/// Aggregate state as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub version: Version,
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for claiming a batch of rows to publish.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Identity written into `claimed_by`.
    pub publisher_id: String,
    pub limit: usize,

    /// How long the claim stays exclusive before another publisher may take it.
    pub lease: Duration,

    /// Rows that failed this many times are no longer claimed.
    pub max_retries: i32,
}

/// Durable storage for aggregate state and outbox rows.
///
/// Both live in the same store so that [`OutboxStore::commit`] can write them
/// in one transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persists the aggregate state and its outbox rows atomically.
    ///
    /// Returns the new aggregate version. On error nothing is visible.
    async fn commit(&self, write: StateWrite, events: Vec<OutboxEvent>) -> Result<Version>;

    /// Loads the latest stored state of an aggregate.
    async fn load_state(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<StoredState>>;

    /// Claims up to `limit` unpublished rows, oldest first.
    ///
    /// A row is skipped when an earlier unpublished row with the same routing
    /// key is currently leased, so a key is never published out of order by
    /// two publishers.
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxEvent>>;

    /// Marks a row published if it is still unpublished.
    ///
    /// Returns `false` when another publisher already marked it.
    async fn mark_published(&self, id: EventId) -> Result<bool>;

    /// Records a failed publish attempt and releases the claim.
    async fn record_failure(&self, id: EventId, error: &str) -> Result<()>;

    /// Releases a claim without counting an attempt.
    async fn release(&self, id: EventId) -> Result<()>;

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>>;

    /// Returns all rows of an aggregate in write order.
    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>>;

    async fn count_unpublished(&self) -> Result<u64>;

    /// Reads rows with a position greater than `after_position`, in order.
    async fn read_from(&self, after_position: i64, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Deletes rows published before `cutoff`. Returns the number removed.
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Extension trait with convenience methods over any [`OutboxStore`].
pub trait OutboxStoreExt: OutboxStore + Clone + 'static {
    /// Streams the whole outbox log in write order, `page_size` rows at a time.
    fn stream_log(&self, page_size: usize) -> EventStream {
        let store = self.clone();
        let pages = futures_util::stream::unfold(
            (store, 0_i64, false),
            move |(store, after, done)| async move {
                if done {
                    return None;
                }
                match store.read_from(after, page_size).await {
                    Ok(rows) if rows.is_empty() => None,
                    Ok(rows) => {
                        let last = rows.last().map(|r| r.position).unwrap_or(after);
                        let done = rows.len() < page_size;
                        let items: Vec<Result<OutboxEvent>> = rows.into_iter().map(Ok).collect();
                        Some((futures_util::stream::iter(items), (store, last, done)))
                    }
                    Err(e) => Some((futures_util::stream::iter(vec![Err(e)]), (store, after, true))),
                }
            },
        );
        Box::pin(futures_util::StreamExt::flatten(pages))
    }
}

impl<T: OutboxStore + Clone + 'static> OutboxStoreExt for T {}
