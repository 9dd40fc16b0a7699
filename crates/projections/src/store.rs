//! Record storage for projections with exactly-once application.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use outbox::EventId;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::Result;

/// Pure record update run inside [`ProjectionStore::apply_once`].
pub type RecordUpdate<'a> = &'a (dyn Fn(Option<Value>) -> Result<Value> + Send + Sync);

/// Result of an atomic apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
}

/// Identifies the event being applied.
#[derive(Debug, Clone, Copy)]
pub struct EventRef<'a> {
    pub id: EventId,
    pub event_type: &'a str,
}

/// Keyed JSON records per projection plus the set of events already applied.
///
/// `apply_once` records the event id and writes the new record in a single
/// atomic step, so a redelivered event can never be applied twice.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn apply_once(
        &self,
        projection: &str,
        key: &str,
        event: EventRef<'_>,
        update: RecordUpdate<'_>,
    ) -> Result<ApplyOutcome>;

    async fn get(&self, projection: &str, key: &str) -> Result<Option<Value>>;

    /// All records of a projection ordered by key.
    async fn list(&self, projection: &str) -> Result<Vec<(String, Value)>>;

    /// Drops every record and applied-event marker of a projection.
    async fn reset(&self, projection: &str) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    records: BTreeMap<(String, String), Value>,
    applied: HashSet<(String, EventId)>,
}

/// In-memory projection store.
#[derive(Clone, Default)]
pub struct InMemoryProjectionStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn apply_once(
        &self,
        projection: &str,
        key: &str,
        event: EventRef<'_>,
        update: RecordUpdate<'_>,
    ) -> Result<ApplyOutcome> {
        let mut tables = self.tables.write().await;
        let marker = (projection.to_string(), event.id);
        if tables.applied.contains(&marker) {
            return Ok(ApplyOutcome::Duplicate);
        }

        let record_key = (projection.to_string(), key.to_string());
        let next = update(tables.records.get(&record_key).cloned())?;

        tables.records.insert(record_key, next);
        tables.applied.insert(marker);
        Ok(ApplyOutcome::Applied)
    }

    async fn get(&self, projection: &str, key: &str) -> Result<Option<Value>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .get(&(projection.to_string(), key.to_string()))
            .cloned())
    }

    async fn list(&self, projection: &str) -> Result<Vec<(String, Value)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .iter()
            .filter(|((p, _), _)| p == projection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn reset(&self, projection: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.records.retain(|(p, _), _| p != projection);
        tables.applied.retain(|(p, _)| p != projection);
        Ok(())
    }
}

/// Applied-event markers live in `processed_events` under this consumer prefix.
const CONSUMER_PREFIX: &str = "projection:";

/// PostgreSQL projection store over `projection_records` and `processed_events`.
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    #[tracing::instrument(skip(self, update), fields(event_id = %event.id))]
    async fn apply_once(
        &self,
        projection: &str,
        key: &str,
        event: EventRef<'_>,
        update: RecordUpdate<'_>,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, event_id, event_type, expires_at)
            VALUES ($1, $2, $3, 'infinity')
            ON CONFLICT (consumer, event_id) DO NOTHING
            "#,
        )
        .bind(format!("{CONSUMER_PREFIX}{projection}"))
        .bind(event.id.as_uuid())
        .bind(event.event_type)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let current: Option<Value> = sqlx::query(
            r#"
            SELECT record FROM projection_records
            WHERE projection = $1 AND record_key = $2
            FOR UPDATE
            "#,
        )
        .bind(projection)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("record"))
        .transpose()?;

        // Dropping the transaction on error rolls back the marker too.
        let next = update(current)?;

        sqlx::query(
            r#"
            INSERT INTO projection_records (projection, record_key, record, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (projection, record_key)
            DO UPDATE SET record = EXCLUDED.record, updated_at = NOW()
            "#,
        )
        .bind(projection)
        .bind(key)
        .bind(&next)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn get(&self, projection: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            "SELECT record FROM projection_records WHERE projection = $1 AND record_key = $2",
        )
        .bind(projection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get("record")).transpose()?)
    }

    async fn list(&self, projection: &str) -> Result<Vec<(String, Value)>> {
        let rows = sqlx::query(
            r#"
            SELECT record_key, record FROM projection_records
            WHERE projection = $1
            ORDER BY record_key
            "#,
        )
        .bind(projection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, Value)> {
                Ok((row.try_get("record_key")?, row.try_get("record")?))
            })
            .collect()
    }

    async fn reset(&self, projection: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM projection_records WHERE projection = $1")
            .bind(projection)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM processed_events WHERE consumer = $1")
            .bind(format!("{CONSUMER_PREFIX}{projection}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
