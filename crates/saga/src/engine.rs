//! Saga workflow engine.
//!
//! Every transition is checkpointed to the [`SagaStore`] before the next
//! step runs, and the engine never keeps a saga on a call stack between
//! steps: a waiting saga is a row in the store plus, at most, a timer. A
//! restarted process resumes open sagas from their history through
//! [`SagaEngine::recover`].
//!
//! All work for one workflow id goes through its slot. The slot lock
//! serializes load/decide/append, and a single driver task per slot runs
//! the steps, so two tasks never advance the same instance at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{RunId, Version, WorkflowId};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;

use crate::activity::{ActivityCall, ActivityContext, ActivityOptions, ActivityRegistry};
use crate::aggregate::{SagaFailure, SagaInstance};
use crate::compensation::{self, PendingCompensation};
use crate::error::{Result, SagaError};
use crate::events::{FailureKind, SagaEvent};
use crate::executor::{ActivityExecutor, DEFAULT_ACTIVITY_WORKERS, InvocationReport};
use crate::payload;
use crate::retry::RetryPolicy;
use crate::signal::{Signal, SignalOutcome};
use crate::state::SagaStatus;
use crate::store::{SagaHistory, SagaStore};
use crate::workflow::{Decision, Workflow};

/// Step name recorded when a saga is cancelled between steps.
pub const CANCELLED_STEP: &str = "cancelled";

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the activity worker pool.
    pub activity_workers: usize,
    /// How many times a driver reloads after losing an append race.
    pub max_conflict_retries: u32,
    /// Backoff for a driver that hit a transient store error. Once the
    /// attempts are used up the saga is parked until the next signal,
    /// cancel or recovery scan.
    pub store_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activity_workers: DEFAULT_ACTIVITY_WORKERS,
            max_conflict_retries: 3,
            store_retry: RetryPolicy::aggressive(),
        }
    }
}

/// What a slot's driver is doing.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DriverState {
    Scheduled,
    Settled(SagaStatus),
    /// Stopped on an error with the saga left at its last checkpoint.
    Parked,
}

struct Slot {
    lock: Arc<Mutex<()>>,
    driving: AtomicBool,
    dirty: AtomicBool,
    retired: AtomicBool,
    cancel: watch::Sender<bool>,
    status: watch::Sender<DriverState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            driving: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            cancel: watch::channel(false).0,
            status: watch::channel(DriverState::Scheduled).0,
            timer: Mutex::new(None),
        }
    }
}

enum Action {
    Settle(SagaStatus),
    Wait(DateTime<Utc>),
    Append(Vec<SagaEvent>),
    Invoke {
        step: String,
        call: ActivityCall,
        options: ActivityOptions,
        best_effort: bool,
    },
    Compensate(PendingCompensation),
}

struct Inner<W, S> {
    workflow: W,
    store: S,
    executor: ActivityExecutor,
    config: EngineConfig,
    slots: Mutex<HashMap<WorkflowId, Arc<Slot>>>,
}

/// Runs sagas of one workflow definition against one store.
pub struct SagaEngine<W, S> {
    inner: Arc<Inner<W, S>>,
}

impl<W, S> Clone for SagaEngine<W, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W, S> SagaEngine<W, S>
where
    W: Workflow,
    S: SagaStore + 'static,
{
    pub fn new(workflow: W, store: S, registry: ActivityRegistry, config: EngineConfig) -> Self {
        let executor = ActivityExecutor::new(registry, config.activity_workers);
        Self {
            inner: Arc::new(Inner {
                workflow,
                store,
                executor,
                config,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn workflow(&self) -> &W {
        &self.inner.workflow
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn executor(&self) -> &ActivityExecutor {
        &self.inner.executor
    }

    /// Starts a new run and returns its id.
    ///
    /// Fails with `AlreadyStarted` if the workflow id has an open run. A
    /// closed workflow id can be started again.
    #[tracing::instrument(skip(self, input), fields(workflow_type = self.inner.workflow.workflow_type()))]
    pub async fn start(&self, input: W::Input) -> Result<RunId> {
        let encoded = payload::encode(&input)?;
        let workflow_id = self.inner.workflow.workflow_id(&input);
        let workflow_type = self.inner.workflow.workflow_type();
        let run_id = RunId::new();

        let (slot, guard) = self.lock_slot(&workflow_id).await;
        let started = SagaEvent::saga_started(workflow_id.clone(), run_id, workflow_type, encoded);
        self.inner
            .store
            .append(
                &workflow_id,
                run_id,
                Version::initial(),
                &[started],
                SagaStatus::Running,
            )
            .await?;
        slot.cancel.send_replace(false);
        drop(guard);

        metrics::counter!("saga_started_total", "workflow_type" => workflow_type).increment(1);
        tracing::info!(%workflow_id, %run_id, "saga started");

        self.schedule(&workflow_id, slot);
        Ok(run_id)
    }

    /// Delivers a signal to the latest run.
    ///
    /// The signal is buffered in the history until a wait point consumes
    /// it, so it may arrive before the saga gets there. A signal whose
    /// dedup id was seen before is dropped.
    #[tracing::instrument(skip(self, payload), fields(workflow_id = %workflow_id, signal = %name))]
    pub async fn signal(
        &self,
        workflow_id: &WorkflowId,
        name: &str,
        payload: Value,
        dedup_id: Option<String>,
    ) -> Result<SignalOutcome> {
        let (slot, guard) = self.lock_slot(workflow_id).await;
        let history = self.load(workflow_id).await?;
        let saga = history.instance()?;

        if saga.status().is_terminal() {
            return Err(SagaError::Closed {
                workflow_id: workflow_id.clone(),
                status: saga.status(),
            });
        }
        if let Some(id) = &dedup_id
            && saga.has_seen_signal(id)
        {
            tracing::debug!(dedup_id = %id, "duplicate signal dropped");
            metrics::counter!("saga_signals_total", "outcome" => "duplicate").increment(1);
            return Ok(SignalOutcome::Duplicate);
        }

        let mut signal = Signal::new(workflow_id.clone(), name, payload);
        if let Some(id) = dedup_id {
            signal = signal.with_dedup_id(id);
        }
        self.inner
            .store
            .append(
                workflow_id,
                history.run_id,
                saga.version(),
                &[SagaEvent::SignalReceived(signal)],
                saga.status(),
            )
            .await?;
        drop(guard);

        metrics::counter!("saga_signals_total", "outcome" => "accepted").increment(1);
        tracing::info!("signal received");

        self.schedule(workflow_id, slot);
        Ok(SignalOutcome::Accepted)
    }

    /// Requests cancellation of the latest run.
    ///
    /// Already completed steps are compensated. An activity attempt that is
    /// running keeps running, but no retry is started after this call.
    /// Cancelling twice is a no-op.
    #[tracing::instrument(skip(self, reason), fields(workflow_id = %workflow_id))]
    pub async fn cancel(&self, workflow_id: &WorkflowId, reason: &str) -> Result<()> {
        let (slot, guard) = self.lock_slot(workflow_id).await;
        let history = self.load(workflow_id).await?;
        let saga = history.instance()?;

        if saga.status().is_terminal() {
            return Err(SagaError::Closed {
                workflow_id: workflow_id.clone(),
                status: saga.status(),
            });
        }
        if saga.cancellation().is_some() || saga.failure().is_some() {
            return Ok(());
        }

        self.inner
            .store
            .append(
                workflow_id,
                history.run_id,
                saga.version(),
                &[SagaEvent::cancellation_requested(reason)],
                saga.status(),
            )
            .await?;
        slot.cancel.send_replace(true);
        drop(guard);

        tracing::info!(%reason, "saga cancellation requested");
        self.schedule(workflow_id, slot);
        Ok(())
    }

    /// Current state of the latest run, rebuilt from its history.
    pub async fn query(&self, workflow_id: &WorkflowId) -> Result<SagaInstance> {
        self.load(workflow_id).await?.instance()
    }

    /// Recorded history of the latest run.
    pub async fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<SagaEvent>> {
        Ok(self.load(workflow_id).await?.events)
    }

    /// Resumes every open saga in the store. Returns how many were scheduled.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let open = self.inner.store.find_by_status(&SagaStatus::open()).await?;
        for workflow_id in &open {
            let slot = self.slot(workflow_id).await;
            self.schedule(workflow_id, slot);
        }
        tracing::info!(count = open.len(), "resumed open sagas");
        Ok(open.len())
    }

    /// Waits until the saga is waiting for a signal or closed, or its
    /// driver has given up on an error.
    pub async fn await_settled(&self, workflow_id: &WorkflowId) -> Result<SagaInstance> {
        self.await_status(workflow_id, |status| status.is_settled())
            .await
    }

    /// Waits until the saga is closed, or its driver has given up on an
    /// error.
    pub async fn await_closed(&self, workflow_id: &WorkflowId) -> Result<SagaInstance> {
        self.await_status(workflow_id, |status| status.is_terminal())
            .await
    }

    async fn await_status(
        &self,
        workflow_id: &WorkflowId,
        done: fn(&SagaStatus) -> bool,
    ) -> Result<SagaInstance> {
        let slot = self.inner.slots.lock().await.get(workflow_id).cloned();
        if let Some(slot) = slot {
            let mut status = slot.status.subscribe();
            let _ = status
                .wait_for(|s| match s {
                    DriverState::Scheduled => false,
                    DriverState::Settled(settled) => done(settled),
                    DriverState::Parked => true,
                })
                .await;
        }
        self.query(workflow_id).await
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<SagaHistory> {
        self.inner
            .store
            .load(workflow_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(workflow_id.clone()))
    }

    async fn slot(&self, workflow_id: &WorkflowId) -> Arc<Slot> {
        let mut slots = self.inner.slots.lock().await;
        Arc::clone(
            slots
                .entry(workflow_id.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    async fn lock_slot(&self, workflow_id: &WorkflowId) -> (Arc<Slot>, OwnedMutexGuard<()>) {
        loop {
            let slot = self.slot(workflow_id).await;
            let guard = Arc::clone(&slot.lock).lock_owned().await;
            if !slot.retired.load(Ordering::Acquire) {
                return (slot, guard);
            }
        }
    }

    /// Drops a closed saga's slot. Called with the slot lock held.
    async fn retire(&self, workflow_id: &WorkflowId, slot: &Arc<Slot>) {
        slot.retired.store(true, Ordering::Release);
        if let Some(timer) = slot.timer.lock().await.take() {
            timer.abort();
        }
        let mut slots = self.inner.slots.lock().await;
        if slots
            .get(workflow_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(workflow_id);
        }
    }

    fn schedule(&self, workflow_id: &WorkflowId, slot: Arc<Slot>) {
        slot.status.send_replace(DriverState::Scheduled);
        slot.dirty.store(true, Ordering::SeqCst);
        if slot.driving.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = self.clone();
        let workflow_id = workflow_id.clone();
        tokio::spawn(async move {
            let policy = engine.inner.config.store_retry.clone();
            let mut failures = 0;
            loop {
                slot.dirty.store(false, Ordering::SeqCst);
                match engine.drive(&workflow_id, &slot).await {
                    Ok(()) => failures = 0,
                    Err(err) if err.is_transient() && failures + 1 < policy.attempts() => {
                        let delay = policy.interval_for(failures);
                        failures += 1;
                        tracing::warn!(
                            %workflow_id,
                            error = %err,
                            attempt = failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "saga driver hit a store error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(err) => {
                        failures = 0;
                        tracing::error!(
                            %workflow_id,
                            error = %err,
                            "saga driver stopped, parked until the next signal or recovery"
                        );
                        if !slot.dirty.load(Ordering::SeqCst) {
                            slot.status.send_replace(DriverState::Parked);
                        }
                    }
                }
                slot.driving.store(false, Ordering::SeqCst);
                if slot.retired.load(Ordering::Acquire)
                    || !slot.dirty.load(Ordering::SeqCst)
                    || slot.driving.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
        });
    }

    async fn arm_timer(&self, workflow_id: &WorkflowId, slot: &Slot, deadline: DateTime<Utc>) {
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let engine = self.clone();
        let id = workflow_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let slot = engine.slot(&id).await;
            engine.schedule(&id, slot);
        });
        if let Some(previous) = slot.timer.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Advances the saga until it settles. Only the slot's driver calls this.
    async fn drive(&self, workflow_id: &WorkflowId, slot: &Arc<Slot>) -> Result<()> {
        let mut conflicts = 0;
        loop {
            let guard = slot.lock.lock().await;
            if slot.retired.load(Ordering::Acquire) {
                return Ok(());
            }
            let history = self.load(workflow_id).await?;
            let saga = history.instance()?;
            let input: W::Input = payload::decode(saga.input())?;

            let result = match self.next_action(&input, &saga)? {
                Action::Settle(status) => {
                    slot.status.send_replace(DriverState::Settled(status));
                    if status.is_terminal() {
                        self.retire(workflow_id, slot).await;
                    }
                    return Ok(());
                }
                Action::Wait(deadline) => {
                    self.arm_timer(workflow_id, slot, deadline).await;
                    slot.status
                        .send_replace(DriverState::Settled(SagaStatus::WaitingSignal));
                    return Ok(());
                }
                Action::Append(events) => self.commit(&saga, events).await,
                Action::Invoke {
                    step,
                    call,
                    options,
                    best_effort,
                } => {
                    drop(guard);
                    let report = self
                        .inner
                        .executor
                        .invoke(
                            self.context(&saga),
                            &call,
                            &options,
                            Some(slot.cancel.subscribe()),
                        )
                        .await;

                    let _guard = slot.lock.lock().await;
                    let saga = self.load(workflow_id).await?.instance()?;
                    if saga.run_id() != history.run_id
                        || saga.status().is_terminal()
                        || saga.status() == SagaStatus::Compensating
                        || saga.is_done(&step)
                    {
                        tracing::warn!(%step, "dropping stale activity outcome");
                        continue;
                    }
                    let events = self.step_outcome(&input, &saga, &step, &call, best_effort, report)?;
                    self.commit(&saga, events).await
                }
                Action::Compensate(pending) => {
                    drop(guard);
                    let report = self
                        .inner
                        .executor
                        .invoke(
                            self.context(&saga),
                            &pending.compensation.call,
                            &pending.compensation.options,
                            None,
                        )
                        .await;

                    let _guard = slot.lock.lock().await;
                    let saga = self.load(workflow_id).await?.instance()?;
                    if saga.run_id() != history.run_id
                        || saga.status() != SagaStatus::Compensating
                        || saga.is_compensated(&pending.step)
                    {
                        tracing::warn!(step = %pending.step, "dropping stale compensation outcome");
                        continue;
                    }
                    let events = self.compensation_outcome(&saga, &pending, report);
                    self.commit(&saga, events).await
                }
            };

            match result {
                Err(SagaError::ConcurrencyConflict { .. })
                    if conflicts < self.inner.config.max_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::debug!(%workflow_id, conflicts, "checkpoint conflict, reloading");
                }
                other => other?,
            }
        }
    }

    fn context(&self, saga: &SagaInstance) -> ActivityContext {
        ActivityContext {
            workflow_id: saga.workflow_id().clone(),
            run_id: saga.run_id(),
            activity: String::new(),
            attempt: 0,
        }
    }

    fn next_action(&self, input: &W::Input, saga: &SagaInstance) -> Result<Action> {
        let workflow = &self.inner.workflow;
        let status = saga.status();

        if status.is_terminal() {
            return Ok(Action::Settle(status));
        }
        if status == SagaStatus::Compensating {
            return Ok(match compensation::next_for(workflow, input, saga)? {
                Some(pending) => Action::Compensate(pending),
                None => Action::Append(vec![SagaEvent::saga_closed(compensation::final_status(
                    saga,
                ))]),
            });
        }
        if let Some(reason) = saga.cancellation() {
            let step = saga.current_step().unwrap_or(CANCELLED_STEP).to_string();
            let events = self.fail(input, saga, &step, FailureKind::Cancelled, reason, 0)?;
            return Ok(Action::Append(events));
        }

        let decision = workflow.decide(input, saga)?;
        if let Some(step) = decision.step()
            && saga.is_done(step)
        {
            return Err(SagaError::Workflow(format!(
                "{} decided already finished step {step}",
                workflow.workflow_type()
            )));
        }

        match decision {
            Decision::Complete { result } => {
                Ok(Action::Append(vec![SagaEvent::saga_completed(result)]))
            }
            Decision::Record { step, output } => Ok(Action::Append(vec![
                SagaEvent::step_completed(step, None, output, 1),
            ])),
            Decision::AwaitSignal {
                step,
                signal,
                timeout,
            } => {
                if let Some(received) = saga.pending_signal(&signal) {
                    return Ok(Action::Append(vec![SagaEvent::signal_consumed(
                        step,
                        received.clone(),
                    )]));
                }
                match saga.waiting() {
                    Some(wait) if wait.step == step => {
                        if Utc::now() < wait.deadline {
                            return Ok(Action::Wait(wait.deadline));
                        }
                        let cause = format!("no {signal} signal before {}", wait.deadline);
                        let events =
                            self.fail(input, saga, &step, FailureKind::SignalTimeout, &cause, 1)?;
                        Ok(Action::Append(events))
                    }
                    _ => {
                        let timeout = chrono::Duration::from_std(timeout).map_err(|e| {
                            SagaError::Workflow(format!("invalid timeout for {step}: {e}"))
                        })?;
                        Ok(Action::Append(vec![SagaEvent::waiting_for_signal(
                            step,
                            signal,
                            Utc::now() + timeout,
                        )]))
                    }
                }
            }
            Decision::Execute {
                step,
                call,
                options,
                best_effort,
            } => {
                if saga.current_step() == Some(step.as_str()) {
                    Ok(Action::Invoke {
                        step,
                        call,
                        options,
                        best_effort,
                    })
                } else {
                    Ok(Action::Append(vec![SagaEvent::step_started(
                        step,
                        call.activity,
                    )]))
                }
            }
        }
    }

    /// Events recording a step failure: `StepFailed`, then either
    /// `CompensationStarted` or, with nothing to undo, `SagaClosed(Failed)`.
    fn fail(
        &self,
        input: &W::Input,
        saga: &SagaInstance,
        step: &str,
        kind: FailureKind,
        cause: &str,
        attempts: u32,
    ) -> Result<Vec<SagaEvent>> {
        let workflow = &self.inner.workflow;
        let reason = workflow.failure_reason(input, step, kind, cause);
        let failure = SagaFailure {
            step: step.to_string(),
            reason: reason.clone(),
            kind,
        };

        let mut events = vec![SagaEvent::step_failed(step, reason, kind, attempts)];
        if compensation::next_pending(workflow, input, saga, &failure)?.is_some() {
            events.push(SagaEvent::compensation_started(step));
        } else {
            events.push(SagaEvent::saga_closed(SagaStatus::Failed));
        }
        Ok(events)
    }

    fn step_outcome(
        &self,
        input: &W::Input,
        saga: &SagaInstance,
        step: &str,
        call: &ActivityCall,
        best_effort: bool,
        report: InvocationReport,
    ) -> Result<Vec<SagaEvent>> {
        match report.output {
            Ok(output) => Ok(vec![SagaEvent::step_completed(
                step,
                Some(call.activity.clone()),
                output,
                report.attempts,
            )]),
            Err(failure) if best_effort => {
                tracing::warn!(
                    workflow_id = %saga.workflow_id(),
                    %step,
                    error = %failure.message,
                    "best-effort step failed, skipping"
                );
                Ok(vec![SagaEvent::step_skipped(
                    step,
                    failure.message,
                    report.attempts,
                )])
            }
            Err(failure) => match saga.cancellation() {
                Some(reason) if failure.kind == FailureKind::Cancelled => self.fail(
                    input,
                    saga,
                    step,
                    FailureKind::Cancelled,
                    reason,
                    report.attempts,
                ),
                _ => self.fail(
                    input,
                    saga,
                    step,
                    failure.kind,
                    &failure.message,
                    report.attempts,
                ),
            },
        }
    }

    fn compensation_outcome(
        &self,
        saga: &SagaInstance,
        pending: &PendingCompensation,
        report: InvocationReport,
    ) -> Vec<SagaEvent> {
        let activity = pending.compensation.call.activity.clone();
        match report.output {
            Ok(_) => vec![SagaEvent::compensation_step_completed(
                &pending.step,
                activity,
            )],
            Err(failure) => {
                tracing::error!(
                    workflow_id = %saga.workflow_id(),
                    run_id = %saga.run_id(),
                    step = %pending.step,
                    %activity,
                    attempts = report.attempts,
                    error = %failure.message,
                    original_failure = saga.failure().map(|f| f.reason.as_str()).unwrap_or(""),
                    "compensation failed"
                );
                vec![SagaEvent::compensation_step_failed(
                    &pending.step,
                    activity,
                    failure.message,
                )]
            }
        }
    }

    async fn commit(&self, saga: &SagaInstance, events: Vec<SagaEvent>) -> Result<()> {
        let mut next = saga.clone();
        for event in &events {
            next.apply(event.clone());
        }
        self.inner
            .store
            .append(
                saga.workflow_id(),
                saga.run_id(),
                saga.version(),
                &events,
                next.status(),
            )
            .await?;
        self.observe(&next, &events);
        Ok(())
    }

    fn observe(&self, saga: &SagaInstance, events: &[SagaEvent]) {
        let workflow_type = self.inner.workflow.workflow_type();
        let elapsed = || {
            saga.started_at()
                .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
                .unwrap_or_default()
        };

        for event in events {
            match event {
                SagaEvent::StepCompleted(data) => {
                    tracing::info!(
                        workflow_id = %saga.workflow_id(),
                        step = %data.step,
                        attempts = data.attempts,
                        "saga step completed"
                    );
                }
                SagaEvent::StepFailed(data) => {
                    tracing::warn!(
                        workflow_id = %saga.workflow_id(),
                        step = %data.step,
                        kind = %data.kind,
                        reason = %data.reason,
                        "saga step failed"
                    );
                }
                SagaEvent::CompensationStepFailed(_) => {
                    metrics::counter!("saga_compensation_failures_total", "workflow_type" => workflow_type)
                        .increment(1);
                }
                SagaEvent::SagaCompleted(_) => {
                    metrics::counter!("saga_completed_total", "workflow_type" => workflow_type)
                        .increment(1);
                    metrics::histogram!("saga_duration_seconds", "workflow_type" => workflow_type)
                        .record(elapsed());
                    tracing::info!(workflow_id = %saga.workflow_id(), "saga completed");
                }
                SagaEvent::SagaClosed(data) => {
                    let counter = match data.status {
                        SagaStatus::Compensated => "saga_compensated_total",
                        _ => "saga_failed_total",
                    };
                    metrics::counter!(counter, "workflow_type" => workflow_type).increment(1);
                    metrics::histogram!("saga_duration_seconds", "workflow_type" => workflow_type)
                        .record(elapsed());
                    tracing::warn!(
                        workflow_id = %saga.workflow_id(),
                        status = %data.status,
                        reason = saga.failure().map(|f| f.reason.as_str()).unwrap_or(""),
                        "saga closed"
                    );
                }
                _ => {}
            }
        }
    }
}
