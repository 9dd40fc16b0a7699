//! Turns order and wave events into saga commands.

use async_trait::async_trait;
use domain::order::{ORDER_CANCELLED, ORDER_RECEIVED};
use domain::wave::WAVE_CREATED;
use domain::{OrderCancelled, OrderReceived, WaveCreated};
use outbox::CloudEvent;
use projections::{EventHandler, HandleOutcome, ProjectionError};
use saga::fulfillment::{self, WAVE_ASSIGNED_SIGNAL, payloads::WaveAssignment};
use saga::{PlanningInput, PlanningWorkflow, SagaEngine, SagaError, SagaStore, SignalOutcome};

/// Consumer name under which delivered event ids are recorded.
pub const PLANNING_CONSUMER: &str = "planning-orchestrator";

/// Starts, signals and cancels planning sagas from delivered events.
///
/// Every command is safe to repeat: a second start reports
/// `AlreadyStarted`, wave signals carry a dedup id derived from the event,
/// and a repeated cancel is a no-op.
pub struct SagaTrigger<S> {
    engine: SagaEngine<PlanningWorkflow, S>,
}

impl<S: SagaStore + 'static> SagaTrigger<S> {
    pub fn new(engine: SagaEngine<PlanningWorkflow, S>) -> Self {
        Self { engine }
    }

    async fn order_received(&self, event: &CloudEvent) -> Result<HandleOutcome, ProjectionError> {
        let data: OrderReceived = event.data_as()?;
        let input = PlanningInput::new(data.order_id, data.customer_id, data.lines, data.priority);

        match self.engine.start(input).await {
            Ok(run_id) => {
                tracing::info!(%run_id, "planning saga started");
                Ok(HandleOutcome::Applied)
            }
            Err(SagaError::AlreadyStarted { run_id, .. }) => {
                tracing::debug!(%run_id, "planning saga already running");
                Ok(HandleOutcome::Duplicate)
            }
            Err(SagaError::InvalidInput(e)) => {
                tracing::warn!(error = %e, "order cannot be planned");
                Ok(HandleOutcome::Ignored)
            }
            Err(e) => Err(handler_error(e)),
        }
    }

    async fn wave_created(&self, event: &CloudEvent) -> Result<HandleOutcome, ProjectionError> {
        let data: WaveCreated = event.data_as()?;
        let assignment = serde_json::to_value(WaveAssignment {
            wave_id: data.wave_id.clone(),
            scheduled_start: data.scheduled_start,
        })?;

        let mut delivered = 0;
        let mut pending = Vec::new();
        for order_id in &data.order_ids {
            let workflow_id = fulfillment::workflow_id(order_id);
            let dedup_id = format!("{}:{order_id}", event.id);
            match self
                .engine
                .signal(
                    &workflow_id,
                    WAVE_ASSIGNED_SIGNAL,
                    assignment.clone(),
                    Some(dedup_id),
                )
                .await
            {
                Ok(SignalOutcome::Accepted) => delivered += 1,
                Ok(SignalOutcome::Duplicate) => {}
                Err(SagaError::NotFound(_)) => pending.push(order_id.as_str()),
                Err(SagaError::Closed { .. }) => {
                    tracing::warn!(%order_id, wave_id = %data.wave_id, "planning saga already closed");
                }
                Err(e) => return Err(handler_error(e)),
            }
        }

        // The order event may still be in flight. Failing leaves the wave
        // unmarked so it is redelivered; orders already signalled dedup.
        if !pending.is_empty() {
            return Err(ProjectionError::Handler(format!(
                "wave {} names orders without a planning saga yet: {}",
                data.wave_id,
                pending.join(", ")
            )));
        }
        if delivered == 0 {
            return Ok(HandleOutcome::Duplicate);
        }
        Ok(HandleOutcome::Applied)
    }

    async fn order_cancelled(&self, event: &CloudEvent) -> Result<HandleOutcome, ProjectionError> {
        let data: OrderCancelled = event.data_as()?;
        let workflow_id = fulfillment::workflow_id(&data.order_id);

        match self.engine.cancel(&workflow_id, &data.reason).await {
            Ok(()) => Ok(HandleOutcome::Applied),
            Err(SagaError::NotFound(_) | SagaError::Closed { .. }) => Ok(HandleOutcome::Ignored),
            Err(e) => Err(handler_error(e)),
        }
    }
}

fn handler_error(err: SagaError) -> ProjectionError {
    ProjectionError::Handler(err.to_string())
}

#[async_trait]
impl<S: SagaStore + 'static> EventHandler for SagaTrigger<S> {
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.id, event_type = %event.event_type, subject = %event.subject)
    )]
    async fn handle(&self, event: &CloudEvent) -> Result<HandleOutcome, ProjectionError> {
        match event.event_type.as_str() {
            ORDER_RECEIVED => self.order_received(event).await,
            WAVE_CREATED => self.wave_created(event).await,
            ORDER_CANCELLED => self.order_cancelled(event).await,
            _ => Ok(HandleOutcome::Ignored),
        }
    }
}
