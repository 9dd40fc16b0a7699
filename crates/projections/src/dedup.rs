//! Processed-event records used by consumers to skip redelivered events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outbox::EventId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::Result;

/// How long a processed-event record is kept unless configured otherwise.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Marker that a consumer finished handling an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub consumer: String,
    pub event_id: EventId,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn new(
        consumer: impl Into<String>,
        event_id: EventId,
        event_type: impl Into<String>,
        retention: Duration,
    ) -> Self {
        let processed_at = Utc::now();
        Self {
            consumer: consumer.into(),
            event_id,
            event_type: event_type.into(),
            processed_at,
            expires_at: processed_at + retention,
        }
    }
}

/// Storage for processed-event markers, keyed by consumer and event id.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Returns true if an unexpired marker exists.
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool>;

    /// Inserts a marker. Returns `false` if one was already present.
    async fn mark_processed(&self, record: ProcessedEvent) -> Result<bool>;

    /// Deletes markers that expired before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory processed-event store for tests and single-process setups.
#[derive(Clone, Default)]
pub struct InMemoryProcessedEventStore {
    records: Arc<RwLock<HashMap<(String, EventId), ProcessedEvent>>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        let records = self.records.read().await;
        Ok(records
            .get(&(consumer.to_string(), event_id))
            .is_some_and(|r| r.expires_at > Utc::now()))
    }

    async fn mark_processed(&self, record: ProcessedEvent) -> Result<bool> {
        let mut records = self.records.write().await;
        let key = (record.consumer.clone(), record.event_id);
        if let Some(existing) = records.get(&key)
            && existing.expires_at > Utc::now()
        {
            return Ok(false);
        }
        records.insert(key, record);
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

/// PostgreSQL processed-event store over the `processed_events` table.
#[derive(Clone)]
pub struct PostgresProcessedEventStore {
    pool: PgPool,
}

impl PostgresProcessedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads a marker regardless of expiry.
    pub async fn get(&self, consumer: &str, event_id: EventId) -> Result<Option<ProcessedEvent>> {
        let row = sqlx::query(
            r#"
            SELECT consumer, event_id, event_type, processed_at, expires_at
            FROM processed_events
            WHERE consumer = $1 AND event_id = $2
            "#,
        )
        .bind(consumer)
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_processed).transpose()
    }
}

fn row_to_processed(row: PgRow) -> Result<ProcessedEvent> {
    let event_id: uuid::Uuid = row.try_get("event_id")?;
    Ok(ProcessedEvent {
        consumer: row.try_get("consumer")?,
        event_id: EventId::from_uuid(event_id),
        event_type: row.try_get("event_type")?,
        processed_at: row.try_get("processed_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl ProcessedEventStore for PostgresProcessedEventStore {
    async fn is_processed(&self, consumer: &str, event_id: EventId) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS hit FROM processed_events
            WHERE consumer = $1 AND event_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(consumer)
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn mark_processed(&self, record: ProcessedEvent) -> Result<bool> {
        // An expired marker is overwritten; a live one wins.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, event_id, event_type, processed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (consumer, event_id) DO UPDATE
                SET event_type = EXCLUDED.event_type,
                    processed_at = EXCLUDED.processed_at,
                    expires_at = EXCLUDED.expires_at
                WHERE processed_events.expires_at <= NOW()
            "#,
        )
        .bind(&record.consumer)
        .bind(record.event_id.as_uuid())
        .bind(&record.event_type)
        .bind(record.processed_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
