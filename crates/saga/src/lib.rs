//! Durable saga engine for warehouse order planning.
//!
//! A saga is a sequence of steps, each backed by an [`Activity`] call, a
//! locally recorded decision, or a wait for a [`Signal`]. Every transition
//! is appended to a [`SagaStore`] as a [`SagaEvent`] before the next step
//! runs; [`SagaInstance`] is rebuilt by folding that history. When a step
//! fails for good, the inverse activities of the completed steps run in
//! reverse order and the original failure stays the reported cause.
//!
//! - [`SagaEngine`]: start, signal, query, cancel and crash recovery
//! - [`ActivityExecutor`]: bounded worker pool, timeouts, retry with backoff
//! - [`PlanningWorkflow`]: validate, reserve units and inventory, wait for a
//!   wave, assign it

pub mod activity;
pub mod aggregate;
pub mod compensation;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod fulfillment;
pub mod memory;
pub mod payload;
pub mod postgres;
pub mod retry;
pub mod services;
pub mod signal;
pub mod state;
pub mod store;
pub mod workflow;

pub use activity::{
    Activity, ActivityCall, ActivityContext, ActivityError, ActivityOptions, ActivityRegistry,
};
pub use aggregate::{CompensationRecord, CompletedStep, SagaFailure, SagaInstance, WaitState};
pub use engine::{EngineConfig, SagaEngine};
pub use error::{Result, SagaError};
pub use events::{FailureKind, SagaEvent};
pub use executor::{ActivityExecutor, ActivityFailure, InvocationReport};
pub use fulfillment::{PlanningConfig, PlanningInput, PlanningResult, PlanningWorkflow};
pub use memory::InMemorySagaStore;
pub use payload::{Payload, PayloadError};
pub use postgres::PostgresSagaStore;
pub use retry::RetryPolicy;
pub use services::{
    InMemoryInventoryService, InMemoryOrderService, InMemoryUnitService, InventoryService,
    OrderService, UnitService,
};
pub use signal::{Signal, SignalOutcome};
pub use state::SagaStatus;
pub use store::{SagaHistory, SagaStore};
pub use workflow::{Compensation, Decision, Workflow};
