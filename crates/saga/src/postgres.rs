use async_trait::async_trait;
use common::{RunId, Version, WorkflowId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::state::SagaStatus;
use crate::store::{SagaHistory, SagaStore};

const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "compensated"];

/// PostgreSQL-backed saga store.
///
/// `saga_instances` holds one status row per workflow id pointing at its
/// latest run; `saga_events` holds the checkpoint log of every run.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_status(row: &PgRow) -> Result<SagaStatus> {
        let status: String = row.try_get("status")?;
        SagaStatus::parse(&status)
            .ok_or_else(|| SagaError::CorruptHistory(format!("unknown saga status {status}")))
    }

    async fn insert_events(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: &WorkflowId,
        run_id: RunId,
        from: Version,
        events: &[SagaEvent],
    ) -> Result<()> {
        let mut version = from;
        for event in events {
            version = version.next();
            sqlx::query(
                r#"
                INSERT INTO saga_events (workflow_id, run_id, version, event_type, payload)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(workflow_id.as_str())
            .bind(run_id.as_uuid())
            .bind(version.as_i64())
            .bind(event.event_type())
            .bind(serde_json::to_value(event)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_saga_run_version")
                {
                    return SagaError::ConcurrencyConflict {
                        workflow_id: workflow_id.clone(),
                        expected: from,
                        actual: version,
                    };
                }
                SagaError::Database(e)
            })?;
        }
        Ok(())
    }

    async fn start_run(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
        events: &[SagaEvent],
        status: SagaStatus,
    ) -> Result<Version> {
        let workflow_type = match events.first() {
            Some(SagaEvent::SagaStarted(data)) => data.workflow_type.clone(),
            _ => {
                return Err(SagaError::CorruptHistory(
                    "a new run must begin with SagaStarted".into(),
                ));
            }
        };
        let version = Version::initial().advance(events.len());
        let mut tx = self.pool.begin().await?;

        // Only a missing row or a closed run may be replaced.
        let affected = sqlx::query(
            r#"
            INSERT INTO saga_instances (workflow_id, run_id, workflow_type, status, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (workflow_id) DO UPDATE
            SET run_id = EXCLUDED.run_id,
                workflow_type = EXCLUDED.workflow_type,
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                updated_at = now()
            WHERE saga_instances.status = ANY($6)
            "#,
        )
        .bind(workflow_id.as_str())
        .bind(run_id.as_uuid())
        .bind(&workflow_type)
        .bind(status.as_str())
        .bind(version.as_i64())
        .bind(TERMINAL_STATUSES.as_slice())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            let existing: Uuid =
                sqlx::query_scalar("SELECT run_id FROM saga_instances WHERE workflow_id = $1")
                    .bind(workflow_id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(SagaError::AlreadyStarted {
                workflow_id: workflow_id.clone(),
                run_id: RunId::from_uuid(existing),
            });
        }

        Self::insert_events(&mut tx, workflow_id, run_id, Version::initial(), events).await?;
        tx.commit().await?;
        Ok(version)
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
        expected: Version,
        events: &[SagaEvent],
        status: SagaStatus,
    ) -> Result<Version> {
        if expected == Version::initial() {
            return self.start_run(workflow_id, run_id, events, status).await;
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT run_id, version FROM saga_instances WHERE workflow_id = $1 FOR UPDATE",
        )
        .bind(workflow_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SagaError::NotFound(workflow_id.clone()))?;

        let current_run = RunId::from_uuid(row.try_get::<Uuid, _>("run_id")?);
        let actual = Version::new(row.try_get("version")?);
        if current_run != run_id || actual != expected {
            return Err(SagaError::ConcurrencyConflict {
                workflow_id: workflow_id.clone(),
                expected,
                actual,
            });
        }

        Self::insert_events(&mut tx, workflow_id, run_id, actual, events).await?;

        let new_version = actual.advance(events.len());
        sqlx::query(
            r#"
            UPDATE saga_instances
            SET status = $2, version = $3, updated_at = now()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id.as_str())
        .bind(status.as_str())
        .bind(new_version.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_version)
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<SagaHistory>> {
        let Some(row) = sqlx::query(
            "SELECT run_id, workflow_type, status, version FROM saga_instances WHERE workflow_id = $1",
        )
        .bind(workflow_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let run_id = RunId::from_uuid(row.try_get::<Uuid, _>("run_id")?);
        let status = Self::row_to_status(&row)?;
        let version = Version::new(row.try_get("version")?);
        let workflow_type: String = row.try_get("workflow_type")?;

        let rows = sqlx::query(
            r#"
            SELECT payload FROM saga_events
            WHERE workflow_id = $1 AND run_id = $2
            ORDER BY version ASC
            "#,
        )
        .bind(workflow_id.as_str())
        .bind(run_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| -> Result<SagaEvent> {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(SagaHistory {
            workflow_id: workflow_id.clone(),
            run_id,
            workflow_type,
            events,
            version,
            status,
        }))
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> Result<Vec<WorkflowId>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT workflow_id FROM saga_instances WHERE status = ANY($1) ORDER BY workflow_id",
        )
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(WorkflowId::new).collect())
    }
}
