//! Planning orchestrator service.
//!
//! Wires the outbox publisher, the event consumers and the saga engine
//! together and exposes an HTTP control surface with structured logging
//! (tracing) and Prometheus metrics.

pub mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod orders;
pub mod routes;
pub mod trigger;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::order::ORDER_TOPIC;
use domain::wave::WAVE_TOPIC;
use domain::{Order, Repository, Wave};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryMessageBus, OutboxPublisher};
use projections::{
    DeduplicatingHandler, EventHandler, IdempotentProjector, OrderStatusProjection,
    ProjectionProcessor,
};
use saga::fulfillment::activities;
use saga::{
    ActivityRegistry, InMemoryInventoryService, InMemoryUnitService, PlanningConfig,
    PlanningWorkflow, SagaEngine,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use backend::{Backend, Stores};
use config::Config;
use consumer::{Consumer, Redelivery};
use error::StartupError;
use orders::RepositoryOrderService;
use trigger::{PLANNING_CONSUMER, SagaTrigger};

pub type OrderStatusView<B> = IdempotentProjector<OrderStatusProjection, <B as Backend>::Projections>;

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backend> {
    pub orders: Repository<B::Outbox, Order>,
    pub waves: Repository<B::Outbox, Wave>,
    pub engine: SagaEngine<PlanningWorkflow, B::Sagas>,
    pub order_status: Arc<OrderStatusView<B>>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backend>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/orders", post(routes::orders::create::<B>))
        .route("/orders/{id}", get(routes::orders::get::<B>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<B>))
        .route("/waves", post(routes::waves::create::<B>))
        .route("/workflows/{id}", get(routes::workflows::get::<B>))
        .route(
            "/workflows/{id}/signals/{name}",
            post(routes::workflows::signal::<B>),
        )
        .route("/workflows/{id}/cancel", post(routes::workflows::cancel::<B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Everything the service runs besides the HTTP server.
pub struct Orchestrator<B: Backend> {
    state: Arc<AppState<B>>,
    bus: InMemoryMessageBus,
    publisher: OutboxPublisher<B::Outbox, InMemoryMessageBus>,
    processor: ProjectionProcessor<B::Outbox>,
    planning: Arc<DeduplicatingHandler<SagaTrigger<B::Sagas>, B::Processed>>,
    log: B::Outbox,
    redelivery: Redelivery,
    shutdown: watch::Sender<bool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: Backend> Orchestrator<B> {
    /// Builds the service over `stores`. Unit and inventory reservations go
    /// to in-process services.
    pub fn new(stores: Stores<B>, config: &Config, planning: PlanningConfig) -> Self {
        let registry = activities::register(
            ActivityRegistry::new(),
            Arc::new(RepositoryOrderService::new(stores.outbox.clone())),
            Arc::new(InMemoryUnitService::new()),
            Arc::new(InMemoryInventoryService::new()),
        );
        let engine = SagaEngine::new(
            PlanningWorkflow::new(planning),
            stores.sagas.clone(),
            registry,
            config.engine_config(),
        );

        let order_status = Arc::new(IdempotentProjector::new(
            OrderStatusProjection,
            stores.projections.clone(),
        ));
        let mut processor = ProjectionProcessor::new(stores.outbox.clone());
        processor.register(order_status.clone());

        let planning = Arc::new(
            DeduplicatingHandler::new(
                PLANNING_CONSUMER,
                SagaTrigger::new(engine.clone()),
                stores.processed.clone(),
            )
            .with_retention(config.dedup_retention()),
        );

        let bus = InMemoryMessageBus::new();
        let publisher = OutboxPublisher::new(
            stores.outbox.clone(),
            bus.clone(),
            config.publisher_config(),
        );

        let log = stores.outbox.clone();
        let state = Arc::new(AppState {
            orders: Repository::new(stores.outbox.clone()),
            waves: Repository::new(stores.outbox),
            engine,
            order_status,
        });

        Self {
            state,
            bus,
            publisher,
            processor,
            planning,
            log,
            redelivery: config.redelivery(),
            shutdown: watch::channel(false).0,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> Arc<AppState<B>> {
        Arc::clone(&self.state)
    }

    pub fn bus(&self) -> &InMemoryMessageBus {
        &self.bus
    }

    pub fn publisher(&self) -> &OutboxPublisher<B::Outbox, InMemoryMessageBus> {
        &self.publisher
    }

    /// Catches up projections, subscribes consumers, resumes open sagas and
    /// starts the publisher.
    pub async fn start(&self) -> Result<(), StartupError> {
        let report = self.processor.run_catch_up().await?;
        tracing::info!(events = report.events, applied = report.applied, "projections caught up");

        let order_status: Arc<dyn EventHandler> = self.state.order_status.clone();
        let planning: Arc<dyn EventHandler> = self.planning.clone();
        let subscriptions = [
            ("order-status", ORDER_TOPIC, order_status),
            ("planning-orders", ORDER_TOPIC, planning.clone()),
            ("planning-waves", WAVE_TOPIC, planning),
        ];

        let mut consumers = self.consumers.lock().await;
        for (name, topic, handler) in subscriptions {
            let receiver = self.bus.subscribe(topic).await;
            let consumer = Consumer::new(
                name,
                topic,
                handler,
                self.log.clone(),
                self.redelivery.clone(),
            );
            consumers.push(consumer.spawn(receiver, self.shutdown.subscribe()));
        }
        drop(consumers);

        let resumed = self.state.engine.recover().await?;
        tracing::info!(resumed, "recovery scan complete");

        self.publisher.start().await;
        Ok(())
    }

    /// Stops the publisher after its batch in flight, then the consumers.
    pub async fn shutdown(&self) {
        self.publisher.stop().await;
        self.shutdown.send_replace(true);

        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        for handle in consumers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "consumer task ended abnormally");
            }
        }
        let stats = self.publisher.stats();
        tracing::info!(
            published = stats.published,
            failed = stats.failed,
            "orchestrator stopped"
        );
    }
}
