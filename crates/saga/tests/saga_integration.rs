//! Integration tests for the planning saga on the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{RunId, Version, WorkflowId};
use domain::{OrderLine, Priority};
use saga::fulfillment::{self, PlanningResult, reasons};
use saga::{
    ActivityError, ActivityOptions, ActivityRegistry, EngineConfig, FailureKind,
    InMemoryInventoryService, InMemoryOrderService, InMemorySagaStore, InMemoryUnitService,
    PlanningConfig, PlanningInput, PlanningWorkflow, RetryPolicy, SagaEngine, SagaError,
    SagaEvent, SagaInstance, SagaStatus, SagaStore, SignalOutcome, payload,
};
use serde_json::json;

type Engine = SagaEngine<PlanningWorkflow, InMemorySagaStore>;

#[derive(Clone, Default)]
struct Harness {
    store: InMemorySagaStore,
    orders: InMemoryOrderService,
    units: InMemoryUnitService,
    inventory: InMemoryInventoryService,
    config: PlanningConfig,
}

fn fast_options(attempts: u32) -> ActivityOptions {
    ActivityOptions::new(
        RetryPolicy::standard()
            .with_initial_interval(Duration::from_millis(1))
            .with_maximum_interval(Duration::from_millis(5))
            .with_maximum_attempts(attempts),
    )
    .with_timeout(Duration::from_secs(2))
}

fn planning_config(attempts: u32, wave_timeout: Duration) -> PlanningConfig {
    PlanningConfig {
        wave_timeout_same_day: wave_timeout,
        wave_timeout_next_day: wave_timeout,
        wave_timeout_default: wave_timeout,
        activity_options: fast_options(attempts),
        compensation_options: fast_options(1),
    }
}

impl Harness {
    fn new() -> (Self, Engine) {
        Self::with_config(planning_config(3, Duration::from_secs(3600)))
    }

    fn with_config(config: PlanningConfig) -> (Self, Engine) {
        let harness = Self {
            config,
            ..Self::default()
        };
        let engine = harness.engine();
        (harness, engine)
    }

    /// An engine over this harness's store and services. Calling it again
    /// stands in for a process restart.
    fn engine(&self) -> Engine {
        self.engine_over(self.store.clone(), EngineConfig::default())
    }

    fn engine_over<S: SagaStore + 'static>(
        &self,
        store: S,
        config: EngineConfig,
    ) -> SagaEngine<PlanningWorkflow, S> {
        let registry = fulfillment::activities::register(
            ActivityRegistry::new(),
            Arc::new(self.orders.clone()),
            Arc::new(self.units.clone()),
            Arc::new(self.inventory.clone()),
        );
        SagaEngine::new(
            PlanningWorkflow::new(self.config.clone()),
            store,
            registry,
            config,
        )
    }
}

/// Saga store whose appends fail with a connection error from the
/// `fail_from`-th append on, `failures` times in total.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: InMemorySagaStore,
    appends: Arc<AtomicU32>,
    fail_from: u32,
    failures: Arc<AtomicU32>,
}

impl FlakyStore {
    fn new(inner: InMemorySagaStore, fail_from: u32, failures: u32) -> Self {
        Self {
            inner,
            appends: Arc::default(),
            fail_from,
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }

    fn heal(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl SagaStore for FlakyStore {
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        run_id: RunId,
        expected: Version,
        events: &[SagaEvent],
        status: SagaStatus,
    ) -> saga::Result<Version> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.fail_from
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            return Err(SagaError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner
            .append(workflow_id, run_id, expected, events, status)
            .await
    }

    async fn load(&self, workflow_id: &WorkflowId) -> saga::Result<Option<saga::SagaHistory>> {
        self.inner.load(workflow_id).await
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> saga::Result<Vec<WorkflowId>> {
        self.inner.find_by_status(statuses).await
    }
}

fn fast_store_retry(attempts: u32) -> EngineConfig {
    EngineConfig {
        store_retry: RetryPolicy::standard()
            .with_initial_interval(Duration::from_millis(1))
            .with_maximum_interval(Duration::from_millis(5))
            .with_maximum_attempts(attempts),
        ..EngineConfig::default()
    }
}

fn order(order_id: &str) -> PlanningInput {
    PlanningInput::new(
        order_id,
        "CUST-1",
        vec![OrderLine::new("SKU-1", 2), OrderLine::new("SKU-2", 1)],
        Priority::SameDay,
    )
}

fn wave_payload(wave_id: &str) -> serde_json::Value {
    json!({"waveId": wave_id, "scheduledStart": Utc::now()})
}

async fn settled(engine: &Engine, workflow_id: &WorkflowId) -> SagaInstance {
    tokio::time::timeout(Duration::from_secs(5), engine.await_settled(workflow_id))
        .await
        .expect("saga did not settle in time")
        .unwrap()
}

async fn closed(engine: &Engine, workflow_id: &WorkflowId) -> SagaInstance {
    tokio::time::timeout(Duration::from_secs(5), engine.await_closed(workflow_id))
        .await
        .expect("saga did not close in time")
        .unwrap()
}

#[tokio::test]
async fn retryable_inventory_failures_then_success_completes_without_compensation() {
    let (h, engine) = Harness::new();
    for _ in 0..2 {
        h.inventory
            .fail_next_reserve(ActivityError::retryable("inventory service unavailable"))
            .await;
    }
    let wf = fulfillment::workflow_id("ORD-001");

    engine.start(order("ORD-001")).await.unwrap();
    let waiting = settled(&engine, &wf).await;

    assert_eq!(waiting.status(), SagaStatus::WaitingSignal);
    assert_eq!(h.inventory.reserve_calls().await, 3);
    assert_eq!(
        waiting
            .completed_step(fulfillment::STEP_RESERVE_INVENTORY)
            .unwrap()
            .attempts,
        3
    );
    assert!(waiting.failure().is_none());

    let outcome = engine
        .signal(&wf, fulfillment::WAVE_ASSIGNED_SIGNAL, wave_payload("W-1"), None)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Accepted);

    let done = closed(&engine, &wf).await;
    assert_eq!(done.status(), SagaStatus::Completed);
    assert!(done.compensations().is_empty());
    assert!(h.units.releases().await.is_empty());

    let result: PlanningResult = payload::decode(done.result().unwrap()).unwrap();
    assert_eq!(result.order_id, "ORD-001");
    assert_eq!(result.wave_id, "W-1");
    assert_eq!(result.unit_ids.len(), 3);
    assert_eq!(
        h.orders.assignments().await,
        vec![("ORD-001".to_string(), "W-1".to_string())]
    );
}

#[tokio::test]
async fn fatal_inventory_failure_releases_units_once() {
    let (h, engine) = Harness::new();
    h.inventory
        .fail_next_reserve(ActivityError::fatal("insufficient stock"))
        .await;
    let wf = fulfillment::workflow_id("ORD-001");

    engine.start(order("ORD-001")).await.unwrap();
    let done = closed(&engine, &wf).await;

    assert_eq!(done.status(), SagaStatus::Compensated);
    assert_eq!(h.inventory.reserve_calls().await, 1);

    let releases = h.units.releases().await;
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].reason, reasons::INVENTORY_RESERVATION_FAILED);
    assert_eq!(releases[0].unit_ids.len(), 3);
    assert!(h.inventory.releases().await.is_empty());

    let failure = done.failure().unwrap();
    assert_eq!(failure.step, fulfillment::STEP_RESERVE_INVENTORY);
    assert_eq!(failure.kind, FailureKind::Fatal);
    assert!(failure.reason.contains("inventory reservation failed"));
    assert!(failure.reason.contains("ORD-001"));
}

#[tokio::test]
async fn failed_release_keeps_the_original_failure() {
    let (h, engine) = Harness::new();
    h.inventory
        .fail_next_reserve(ActivityError::fatal("insufficient stock"))
        .await;
    h.units
        .fail_next_release(ActivityError::fatal("unit service rejected release"))
        .await;
    let wf = fulfillment::workflow_id("ORD-001");

    engine.start(order("ORD-001")).await.unwrap();
    let done = closed(&engine, &wf).await;

    assert_eq!(done.status(), SagaStatus::Failed);
    assert_eq!(h.units.releases().await.len(), 1);
    assert_eq!(
        done.compensations()[0].error.as_deref(),
        Some("unit service rejected release")
    );

    let failure = done.failure().unwrap();
    assert!(failure.reason.contains("inventory reservation failed"));
    assert!(failure.reason.contains("ORD-001"));
    assert!(!failure.reason.contains("rejected release"));
}

#[tokio::test]
async fn wave_timeout_compensates_completed_steps_in_reverse() {
    let (h, engine) = Harness::with_config(planning_config(3, Duration::from_millis(50)));
    let wf = fulfillment::workflow_id("ORD-002");

    engine.start(order("ORD-002")).await.unwrap();
    let done = closed(&engine, &wf).await;

    assert_eq!(done.status(), SagaStatus::Compensated);
    let failure = done.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::SignalTimeout);
    assert_eq!(failure.reason, "wave assignment timeout for order ORD-002");

    let undone: Vec<&str> = done
        .compensations()
        .iter()
        .map(|c| c.step.as_str())
        .collect();
    assert_eq!(
        undone,
        vec![
            fulfillment::STEP_RESERVE_INVENTORY,
            fulfillment::STEP_RESERVE_UNITS
        ]
    );
    assert_eq!(
        h.inventory.releases().await[0].reason,
        reasons::WAVE_ASSIGNMENT_TIMEOUT
    );
    assert_eq!(h.units.releases().await[0].reason, reasons::WAVE_ASSIGNMENT_TIMEOUT);
}

#[tokio::test]
async fn always_retryable_activity_is_invoked_exactly_max_attempts() {
    let (h, engine) = Harness::with_config(planning_config(4, Duration::from_secs(3600)));
    for _ in 0..10 {
        h.units
            .fail_next_reserve(ActivityError::retryable("unit service unavailable"))
            .await;
    }
    let wf = fulfillment::workflow_id("ORD-003");

    engine.start(order("ORD-003")).await.unwrap();
    let done = closed(&engine, &wf).await;

    assert_eq!(h.units.reserve_calls().await, 4);
    assert_eq!(done.status(), SagaStatus::Failed);
    let failure = done.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert!(failure.reason.contains("unit reservation failed for order ORD-003"));

    // Nothing was reserved, so nothing is released.
    assert!(h.units.releases().await.is_empty());
    assert!(done.compensations().is_empty());
}

#[tokio::test]
async fn early_signal_is_buffered_until_the_wait_point() {
    let (h, engine) = Harness::new();
    let wf = fulfillment::workflow_id("ORD-004");

    engine.start(order("ORD-004")).await.unwrap();
    engine
        .signal(&wf, fulfillment::WAVE_ASSIGNED_SIGNAL, wave_payload("W-4"), None)
        .await
        .unwrap();

    let done = closed(&engine, &wf).await;
    assert_eq!(done.status(), SagaStatus::Completed);
    assert!(done.pending_signals().is_empty());
    let result: PlanningResult = payload::decode(done.result().unwrap()).unwrap();
    assert_eq!(result.wave_id, "W-4");
}

#[tokio::test]
async fn cancel_while_waiting_compensates() {
    let (h, engine) = Harness::new();
    let wf = fulfillment::workflow_id("ORD-005");

    engine.start(order("ORD-005")).await.unwrap();
    assert_eq!(settled(&engine, &wf).await.status(), SagaStatus::WaitingSignal);

    engine.cancel(&wf, "customer request").await.unwrap();
    engine.cancel(&wf, "customer request").await.ok();
    let done = closed(&engine, &wf).await;

    assert_eq!(done.status(), SagaStatus::Compensated);
    let failure = done.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.step, fulfillment::STEP_WAIT_FOR_WAVE);
    assert!(failure.reason.contains("planning cancelled for order ORD-005"));

    let releases = h.units.releases().await;
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].reason, reasons::CANCELLED);
    assert_eq!(h.inventory.releases().await.len(), 1);

    let err = engine.cancel(&wf, "again").await.unwrap_err();
    assert!(matches!(err, SagaError::Closed { .. }));
}

#[tokio::test]
async fn duplicate_signal_ids_are_dropped() {
    let (h, engine) = Harness::new();
    let wf = fulfillment::workflow_id("ORD-006");

    engine.start(order("ORD-006")).await.unwrap();
    settled(&engine, &wf).await;

    let first = engine
        .signal(&wf, "priorityChanged", json!({"priority": "next_day"}), Some("evt-1".into()))
        .await
        .unwrap();
    let second = engine
        .signal(&wf, "priorityChanged", json!({"priority": "next_day"}), Some("evt-1".into()))
        .await
        .unwrap();

    assert_eq!(first, SignalOutcome::Accepted);
    assert_eq!(second, SignalOutcome::Duplicate);
    let saga = settled(&engine, &wf).await;
    assert_eq!(saga.pending_signals().len(), 1);
    assert_eq!(saga.status(), SagaStatus::WaitingSignal);
}

#[tokio::test]
async fn best_effort_wave_assignment_failure_is_skipped() {
    let (h, engine) = Harness::with_config(planning_config(1, Duration::from_secs(3600)));
    h.orders
        .fail_next_assign(ActivityError::retryable("order service unavailable"))
        .await;
    let wf = fulfillment::workflow_id("ORD-007");

    engine.start(order("ORD-007")).await.unwrap();
    settled(&engine, &wf).await;
    engine
        .signal(&wf, fulfillment::WAVE_ASSIGNED_SIGNAL, wave_payload("W-7"), None)
        .await
        .unwrap();

    let done = closed(&engine, &wf).await;
    assert_eq!(done.status(), SagaStatus::Completed);
    assert_eq!(done.skipped_steps(), [fulfillment::STEP_ASSIGN_TO_WAVE.to_string()]);
    assert!(h.orders.assignments().await.is_empty());
}

#[tokio::test]
async fn rejected_order_fails_without_compensation() {
    let (h, engine) = Harness::new();
    h.orders.reject("ORD-008").await;
    let wf = fulfillment::workflow_id("ORD-008");

    engine.start(order("ORD-008")).await.unwrap();
    let done = closed(&engine, &wf).await;

    assert_eq!(done.status(), SagaStatus::Failed);
    assert!(done
        .failure()
        .unwrap()
        .reason
        .starts_with("order validation failed for order ORD-008"));
    assert_eq!(h.units.reserve_calls().await, 0);
}

#[tokio::test]
async fn start_is_rejected_while_open_and_allowed_after_close() {
    let (h, engine) = Harness::new();
    let wf = fulfillment::workflow_id("ORD-009");

    let first = engine.start(order("ORD-009")).await.unwrap();
    settled(&engine, &wf).await;

    let err = engine.start(order("ORD-009")).await.unwrap_err();
    assert!(matches!(err, SagaError::AlreadyStarted { run_id, .. } if run_id == first));

    engine.cancel(&wf, "replanning").await.unwrap();
    closed(&engine, &wf).await;

    let second = engine.start(order("ORD-009")).await.unwrap();
    assert_ne!(first, second);
    let saga = settled(&engine, &wf).await;
    assert_eq!(saga.run_id(), second);
    assert_eq!(saga.status(), SagaStatus::WaitingSignal);
}

#[tokio::test]
async fn invalid_input_and_unknown_workflows_are_errors() {
    let (_h, engine) = Harness::new();

    let empty = PlanningInput::new("ORD-010", "CUST-1", vec![], Priority::Standard);
    assert!(matches!(
        engine.start(empty).await,
        Err(SagaError::InvalidInput(_))
    ));

    let missing = WorkflowId::new("planning-nope");
    assert!(matches!(
        engine.query(&missing).await,
        Err(SagaError::NotFound(_))
    ));
    assert!(matches!(
        engine.signal(&missing, "waveAssigned", json!({}), None).await,
        Err(SagaError::NotFound(_))
    ));
}

#[tokio::test]
async fn replaying_recorded_history_is_deterministic() {
    let (h, engine) = Harness::new();
    h.inventory
        .fail_next_reserve(ActivityError::fatal("insufficient stock"))
        .await;
    let wf = fulfillment::workflow_id("ORD-011");

    engine.start(order("ORD-011")).await.unwrap();
    let done = closed(&engine, &wf).await;

    let history = engine.history(&wf).await.unwrap();
    let first = SagaInstance::replay(&history).unwrap();
    let second = SagaInstance::replay(&history).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, done);
}

#[tokio::test]
async fn recovery_resumes_an_interrupted_step_from_its_checkpoint() {
    let (h, _) = Harness::new();
    let input = order("ORD-012");
    let wf = fulfillment::workflow_id("ORD-012");
    let run_id = RunId::new();

    // A previous process validated the order and crashed while reserving units.
    let events = vec![
        SagaEvent::saga_started(
            wf.clone(),
            run_id,
            fulfillment::WORKFLOW_TYPE,
            payload::encode(&input).unwrap(),
        ),
        SagaEvent::step_started(fulfillment::STEP_VALIDATE_ORDER, "ValidateOrder"),
        SagaEvent::step_completed(
            fulfillment::STEP_VALIDATE_ORDER,
            Some("ValidateOrder".into()),
            payload::encode(&()).unwrap(),
            1,
        ),
        SagaEvent::step_started(fulfillment::STEP_RESERVE_UNITS, "ReserveUnits"),
    ];
    h.store
        .append(&wf, run_id, Version::initial(), &events, SagaStatus::Running)
        .await
        .unwrap();

    let engine = h.engine();
    assert_eq!(engine.recover().await.unwrap(), 1);

    let saga = settled(&engine, &wf).await;
    assert_eq!(saga.status(), SagaStatus::WaitingSignal);
    assert_eq!(saga.run_id(), run_id);
    assert_eq!(h.orders.validations().await, 0);
    assert_eq!(h.units.reserve_calls().await, 1);

    engine
        .signal(&wf, fulfillment::WAVE_ASSIGNED_SIGNAL, wave_payload("W-12"), None)
        .await
        .unwrap();
    assert_eq!(closed(&engine, &wf).await.status(), SagaStatus::Completed);
}

#[tokio::test]
async fn a_new_engine_picks_up_a_waiting_saga() {
    let (h, engine) = Harness::new();
    let wf = fulfillment::workflow_id("ORD-013");

    engine.start(order("ORD-013")).await.unwrap();
    settled(&engine, &wf).await;

    let engine = h.engine();
    assert_eq!(engine.recover().await.unwrap(), 1);
    assert_eq!(settled(&engine, &wf).await.status(), SagaStatus::WaitingSignal);

    engine
        .signal(&wf, fulfillment::WAVE_ASSIGNED_SIGNAL, wave_payload("W-13"), None)
        .await
        .unwrap();
    let done = closed(&engine, &wf).await;
    assert_eq!(done.status(), SagaStatus::Completed);
    assert_eq!(h.units.reserve_calls().await, 1);
}

#[tokio::test]
async fn transient_store_error_is_retried_by_the_driver() {
    let (h, _) = Harness::new();
    let store = FlakyStore::new(h.store.clone(), 3, 1);
    let engine = h.engine_over(store, fast_store_retry(5));
    let wf = fulfillment::workflow_id("ORD-050");

    engine.start(order("ORD-050")).await.unwrap();
    let saga = tokio::time::timeout(Duration::from_secs(5), engine.await_settled(&wf))
        .await
        .expect("saga did not settle in time")
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::WaitingSignal);
    assert_eq!(saga.completed_steps().len(), 3);
    assert!(saga.failure().is_none());
}

#[tokio::test]
async fn persistent_store_error_parks_the_saga_until_recovery() {
    let (h, _) = Harness::new();
    let store = FlakyStore::new(h.store.clone(), 2, u32::MAX);
    let engine = h.engine_over(store.clone(), fast_store_retry(3));
    let wf = fulfillment::workflow_id("ORD-051");

    engine.start(order("ORD-051")).await.unwrap();
    let parked = tokio::time::timeout(Duration::from_secs(5), engine.await_settled(&wf))
        .await
        .expect("waiters were not released when the driver gave up")
        .unwrap();
    assert_eq!(parked.status(), SagaStatus::Running);
    assert!(parked.completed_steps().is_empty());

    store.heal();
    assert_eq!(engine.recover().await.unwrap(), 1);
    let resumed = tokio::time::timeout(Duration::from_secs(5), engine.await_settled(&wf))
        .await
        .expect("saga did not resume after recovery")
        .unwrap();
    assert_eq!(resumed.status(), SagaStatus::WaitingSignal);
    assert_eq!(resumed.completed_steps().len(), 3);
}
