//! Unit service: tracks the physical units picked for an order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderLine;
use tokio::sync::Mutex;

use crate::activity::ActivityError;

#[async_trait]
pub trait UnitService: Send + Sync {
    /// Reserves one unit per requested item and returns their ids.
    async fn reserve(&self, order_id: &str, lines: &[OrderLine])
    -> Result<Vec<String>, ActivityError>;

    /// Releases the order's units. An empty `unit_ids` releases whatever
    /// the service holds for the order.
    async fn release(
        &self,
        order_id: &str,
        unit_ids: &[String],
        reason: &str,
    ) -> Result<(), ActivityError>;
}

/// A recorded release call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRelease {
    pub order_id: String,
    pub unit_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
struct UnitState {
    reserved: HashMap<String, Vec<String>>,
    next_id: u32,
    reserve_calls: u32,
    reserve_failures: VecDeque<ActivityError>,
    release_failures: VecDeque<ActivityError>,
    releases: Vec<UnitRelease>,
}

/// In-memory unit service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUnitService {
    state: Arc<Mutex<UnitState>>,
}

impl InMemoryUnitService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next_reserve(&self, error: ActivityError) {
        self.state.lock().await.reserve_failures.push_back(error);
    }

    pub async fn fail_next_release(&self, error: ActivityError) {
        self.state.lock().await.release_failures.push_back(error);
    }

    pub async fn reserve_calls(&self) -> u32 {
        self.state.lock().await.reserve_calls
    }

    /// Every release call, failed ones included.
    pub async fn releases(&self) -> Vec<UnitRelease> {
        self.state.lock().await.releases.clone()
    }

    pub async fn reserved_units(&self, order_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .reserved
            .get(order_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl UnitService for InMemoryUnitService {
    async fn reserve(
        &self,
        order_id: &str,
        lines: &[OrderLine],
    ) -> Result<Vec<String>, ActivityError> {
        let mut state = self.state.lock().await;
        state.reserve_calls += 1;

        if let Some(error) = state.reserve_failures.pop_front() {
            return Err(error);
        }
        if let Some(existing) = state.reserved.get(order_id) {
            return Ok(existing.clone());
        }

        let count: u32 = lines.iter().map(|l| l.quantity).sum();
        let mut unit_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            state.next_id += 1;
            unit_ids.push(format!("U-{:05}", state.next_id));
        }
        state.reserved.insert(order_id.to_string(), unit_ids.clone());
        Ok(unit_ids)
    }

    async fn release(
        &self,
        order_id: &str,
        unit_ids: &[String],
        reason: &str,
    ) -> Result<(), ActivityError> {
        let mut state = self.state.lock().await;
        state.releases.push(UnitRelease {
            order_id: order_id.to_string(),
            unit_ids: unit_ids.to_vec(),
            reason: reason.to_string(),
        });

        if let Some(error) = state.release_failures.pop_front() {
            return Err(error);
        }
        state.reserved.remove(order_id);
        Ok(())
    }
}
