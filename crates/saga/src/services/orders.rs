//! Order service as seen from planning: validation and wave assignment.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::activity::ActivityError;

#[async_trait]
pub trait OrderService: Send + Sync {
    /// Checks that the order can be planned.
    async fn validate(&self, order_id: &str) -> Result<(), ActivityError>;

    /// Records the order's wave on the order itself.
    async fn assign_to_wave(&self, order_id: &str, wave_id: &str) -> Result<(), ActivityError>;
}

#[derive(Debug, Default)]
struct OrderState {
    rejected: HashSet<String>,
    validations: u32,
    assign_failures: VecDeque<ActivityError>,
    assignments: Vec<(String, String)>,
}

/// In-memory order service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<Mutex<OrderState>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes validation of `order_id` fail fatally.
    pub async fn reject(&self, order_id: impl Into<String>) {
        self.state.lock().await.rejected.insert(order_id.into());
    }

    pub async fn fail_next_assign(&self, error: ActivityError) {
        self.state.lock().await.assign_failures.push_back(error);
    }

    pub async fn validations(&self) -> u32 {
        self.state.lock().await.validations
    }

    /// `(order_id, wave_id)` pairs that were assigned successfully.
    pub async fn assignments(&self) -> Vec<(String, String)> {
        self.state.lock().await.assignments.clone()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn validate(&self, order_id: &str) -> Result<(), ActivityError> {
        let mut state = self.state.lock().await;
        state.validations += 1;
        if state.rejected.contains(order_id) {
            return Err(ActivityError::fatal(format!(
                "order {order_id} cannot be planned"
            )));
        }
        Ok(())
    }

    async fn assign_to_wave(&self, order_id: &str, wave_id: &str) -> Result<(), ActivityError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.assign_failures.pop_front() {
            return Err(error);
        }
        state
            .assignments
            .push((order_id.to_string(), wave_id.to_string()));
        Ok(())
    }
}
