use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventId, OutboxError, OutboxEvent, Result, Version,
    store::{ClaimRequest, OutboxStore, StateWrite, StoredState},
};

const EVENT_COLUMNS: &str = "id, position, aggregate_id, aggregate_type, event_type, payload, \
     topic, routing_key, created_at, published_at, retry_count, last_error, claimed_by, claimed_until";

/// Advisory lock class for routing keys being claimed.
const CLAIM_LOCK_CLASS: i32 = 0x6f62;

/// PostgreSQL-backed outbox store.
///
/// Aggregate state lives in `aggregate_states`, rows in `outbox_events`; both
/// are written in one transaction.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            position: row.try_get("position")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            topic: row.try_get("topic")?,
            routing_key: row.try_get("routing_key")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            claimed_by: row.try_get("claimed_by")?,
            claimed_until: row.try_get("claimed_until")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn commit(&self, write: StateWrite, events: Vec<OutboxEvent>) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM aggregate_states WHERE aggregate_type = $1 AND aggregate_id = $2 FOR UPDATE",
        )
        .bind(&write.aggregate_type)
        .bind(&write.aggregate_id)
        .fetch_optional(&mut *tx)
        .await?;

        let actual = Version::new(current.unwrap_or(0));
        if actual != write.expected_version {
            return Err(OutboxError::ConcurrencyConflict {
                aggregate_type: write.aggregate_type,
                aggregate_id: write.aggregate_id,
                expected: write.expected_version,
                actual,
            });
        }

        let new_version = actual.next();
        let affected = sqlx::query(
            r#"
            INSERT INTO aggregate_states (aggregate_type, aggregate_id, version, state, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (aggregate_type, aggregate_id) DO UPDATE
            SET version = EXCLUDED.version, state = EXCLUDED.state, updated_at = now()
            WHERE aggregate_states.version = $5
            "#,
        )
        .bind(&write.aggregate_type)
        .bind(&write.aggregate_id)
        .bind(new_version.as_i64())
        .bind(&write.state)
        .bind(actual.as_i64())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // A concurrent first insert wins the race; the conflict branch then
        // fails the version predicate and updates nothing.
        if affected == 0 {
            return Err(OutboxError::ConcurrencyConflict {
                aggregate_type: write.aggregate_type,
                aggregate_id: write.aggregate_id,
                expected: write.expected_version,
                actual: actual.next(),
            });
        }

        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO outbox_events
                    (id, aggregate_id, aggregate_type, event_type, payload, topic, routing_key, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(&event.aggregate_id)
            .bind(&event.aggregate_type)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.topic)
            .bind(&event.routing_key)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("outbox_events_pkey")
                {
                    return OutboxError::DuplicateEvent(event.id);
                }
                OutboxError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(new_version)
    }

    async fn load_state(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<StoredState>> {
        let row = sqlx::query(
            r#"
            SELECT version, state, updated_at
            FROM aggregate_states
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<StoredState> {
            Ok(StoredState {
                version: Version::new(row.try_get("version")?),
                state: row.try_get("state")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;

        // A claimer holds the advisory lock of every key it claims under
        // until commit. Keys held elsewhere are skipped and the limit stops
        // the scan, so only keys this batch can use are locked. The claim
        // below runs as a new statement, so it sees every lease committed by
        // the previous holder of each key.
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            WITH heads AS MATERIALIZED (
                SELECT routing_key, min(position) AS head
                FROM outbox_events
                WHERE published_at IS NULL
                  AND retry_count < $2
                  AND (claimed_until IS NULL OR claimed_until < now())
                GROUP BY routing_key
                ORDER BY min(created_at), head
            )
            SELECT routing_key FROM heads
            WHERE pg_try_advisory_xact_lock($1, hashtext(routing_key))
            LIMIT $3
            "#,
        )
        .bind(CLAIM_LOCK_CLASS)
        .bind(request.max_retries)
        .bind(request.limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if keys.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE outbox_events
            SET claimed_by = $1, claimed_until = now() + make_interval(secs => $2)
            WHERE id IN (
                SELECT c.id FROM outbox_events c
                WHERE c.published_at IS NULL
                  AND c.retry_count < $3
                  AND c.routing_key = ANY($5)
                  AND (c.claimed_until IS NULL OR c.claimed_until < now())
                  AND NOT EXISTS (
                      SELECT 1 FROM outbox_events p
                      WHERE p.routing_key = c.routing_key
                        AND p.published_at IS NULL
                        AND p.position < c.position
                        AND p.claimed_until >= now()
                  )
                ORDER BY c.created_at, c.position
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&request.publisher_id)
            .bind(request.lease.as_secs_f64())
            .bind(request.max_retries)
            .bind(request.limit as i64)
            .bind(&keys)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;
        events.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.position.cmp(&b.position))
        });
        Ok(events)
    }

    async fn mark_published(&self, id: EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published_at = now(), claimed_by = NULL, claimed_until = NULL
            WHERE id = $1 AND published_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, id: EventId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2,
                claimed_by = NULL, claimed_until = NULL
            WHERE id = $1 AND published_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, id: EventId) -> Result<()> {
        sqlx::query("UPDATE outbox_events SET claimed_by = NULL, claimed_until = NULL WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_event).transpose()
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_events WHERE aggregate_id = $1 ORDER BY position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn count_unpublished(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn read_from(&self, after_position: i64, limit: usize) -> Result<Vec<OutboxEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_events WHERE position > $1 ORDER BY position ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(after_position)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE published_at IS NOT NULL AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
