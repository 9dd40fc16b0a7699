//! Storage backends: every store the service needs, in memory or in
//! PostgreSQL.

use outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use projections::{
    InMemoryProcessedEventStore, InMemoryProjectionStore, PostgresProcessedEventStore,
    PostgresProjectionStore, ProcessedEventStore, ProjectionStore,
};
use saga::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use sqlx::postgres::PgPoolOptions;

use crate::error::StartupError;

/// A family of store implementations.
pub trait Backend: Send + Sync + 'static {
    type Outbox: OutboxStore + Clone + 'static;
    type Sagas: SagaStore + Clone + 'static;
    type Projections: ProjectionStore + Clone + 'static;
    type Processed: ProcessedEventStore + Clone + 'static;
}

/// Process-local stores. State is lost on restart.
pub enum InMemory {}

impl Backend for InMemory {
    type Outbox = InMemoryOutboxStore;
    type Sagas = InMemorySagaStore;
    type Projections = InMemoryProjectionStore;
    type Processed = InMemoryProcessedEventStore;
}

/// Stores sharing one PostgreSQL pool.
pub enum Postgres {}

impl Backend for Postgres {
    type Outbox = PostgresOutboxStore;
    type Sagas = PostgresSagaStore;
    type Projections = PostgresProjectionStore;
    type Processed = PostgresProcessedEventStore;
}

pub struct Stores<B: Backend> {
    pub outbox: B::Outbox,
    pub sagas: B::Sagas,
    pub projections: B::Projections,
    pub processed: B::Processed,
}

impl<B: Backend> Clone for Stores<B> {
    fn clone(&self) -> Self {
        Self {
            outbox: self.outbox.clone(),
            sagas: self.sagas.clone(),
            projections: self.projections.clone(),
            processed: self.processed.clone(),
        }
    }
}

impl Stores<InMemory> {
    pub fn in_memory() -> Self {
        Self {
            outbox: InMemoryOutboxStore::new(),
            sagas: InMemorySagaStore::new(),
            projections: InMemoryProjectionStore::new(),
            processed: InMemoryProcessedEventStore::new(),
        }
    }
}

impl Stores<Postgres> {
    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let outbox = PostgresOutboxStore::new(pool.clone());
        outbox.run_migrations().await.map_err(outbox::OutboxError::from)?;
        tracing::info!("database migrations applied");

        Ok(Self {
            outbox,
            sagas: PostgresSagaStore::new(pool.clone()),
            projections: PostgresProjectionStore::new(pool.clone()),
            processed: PostgresProcessedEventStore::new(pool),
        })
    }
}
