//! PostgreSQL integration tests for consumer dedup and projection records.
//!
//! These tests start a PostgreSQL container and therefore need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p projections --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use outbox::{CloudEvent, EventId};
use projections::{
    EventHandler, HandleOutcome, IdempotentProjector, OrderStatusProjection,
    PostgresProcessedEventStore, PostgresProjectionStore, ProcessedEvent, ProcessedEventStore,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/003_create_projection_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE processed_events, projection_records")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn wave_assigned(order_id: &str) -> CloudEvent {
    CloudEvent::new(
        "wms.order.wave-assigned",
        "/wms/order-service",
        format!("order/{order_id}"),
        serde_json::json!({"orderId": order_id, "waveId": "W-7", "assignedAt": Utc::now()}),
    )
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn processed_markers_detect_duplicates() {
    let store = PostgresProcessedEventStore::new(get_test_pool().await);
    let id = EventId::new();
    let record = ProcessedEvent::new("planning", id, "wms.order.received", Duration::hours(24));

    assert!(store.mark_processed(record.clone()).await.unwrap());
    assert!(!store.mark_processed(record).await.unwrap());
    assert!(store.is_processed("planning", id).await.unwrap());
    assert!(!store.is_processed("other", id).await.unwrap());

    let stored = store.get("planning", id).await.unwrap().unwrap();
    assert_eq!(stored.event_type, "wms.order.received");
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn expired_markers_are_purged() {
    let store = PostgresProcessedEventStore::new(get_test_pool().await);
    let id = EventId::new();
    let mut record = ProcessedEvent::new("planning", id, "t", Duration::hours(1));
    record.expires_at = Utc::now() - Duration::minutes(1);
    store.mark_processed(record).await.unwrap();

    assert!(!store.is_processed("planning", id).await.unwrap());
    assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
    assert!(store.get("planning", id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn concurrent_redelivery_applies_once() {
    let pool = get_test_pool().await;
    let projector = Arc::new(IdempotentProjector::new(
        OrderStatusProjection,
        PostgresProjectionStore::new(pool),
    ));
    let event = wave_assigned("ORD-001");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let projector = projector.clone();
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            projector.handle(&event).await.unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap() == HandleOutcome::Applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let record = projector.get("ORD-001").await.unwrap().unwrap();
    assert_eq!(record.events_applied, 1);
    assert_eq!(record.wave_id.as_deref(), Some("W-7"));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn reset_allows_replay() {
    let pool = get_test_pool().await;
    let projector = IdempotentProjector::new(OrderStatusProjection, PostgresProjectionStore::new(pool));
    let event = wave_assigned("ORD-002");

    projector.handle(&event).await.unwrap();
    projector.reset().await.unwrap();
    assert!(projector.list().await.unwrap().is_empty());

    assert_eq!(projector.handle(&event).await.unwrap(), HandleOutcome::Applied);
}
