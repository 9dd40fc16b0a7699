//! Order service backed by the order repository, used by the planning
//! activities.

use async_trait::async_trait;
use domain::{DomainError, Order, OrderStatus, Repository};
use outbox::{OutboxError, OutboxStore};
use saga::{ActivityError, OrderService};

pub struct RepositoryOrderService<O: OutboxStore> {
    orders: Repository<O, Order>,
}

impl<O: OutboxStore> RepositoryOrderService<O> {
    pub fn new(store: O) -> Self {
        Self {
            orders: Repository::new(store),
        }
    }
}

/// Rule violations and missing orders will not heal on retry; store
/// failures and lost version races might.
fn classify(err: DomainError) -> ActivityError {
    match err {
        DomainError::Order(_) | DomainError::Wave(_) | DomainError::AggregateNotFound { .. } => {
            ActivityError::fatal(err.to_string())
        }
        DomainError::Outbox(OutboxError::ConcurrencyConflict { .. }) => {
            ActivityError::retryable(err.to_string())
        }
        other => ActivityError::retryable(other.to_string()),
    }
}

#[async_trait]
impl<O: OutboxStore + 'static> OrderService for RepositoryOrderService<O> {
    async fn validate(&self, order_id: &str) -> Result<(), ActivityError> {
        let order = self.orders.get(order_id).await.map_err(classify)?;
        if order.status() == OrderStatus::Cancelled {
            return Err(ActivityError::fatal(format!("order {order_id} is cancelled")));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn assign_to_wave(&self, order_id: &str, wave_id: &str) -> Result<(), ActivityError> {
        let mut order = self.orders.get(order_id).await.map_err(classify)?;
        order
            .assign_wave(wave_id)
            .map_err(|e| ActivityError::fatal(e.to_string()))?;
        self.orders.save(&mut order).await.map_err(classify)?;
        Ok(())
    }
}
