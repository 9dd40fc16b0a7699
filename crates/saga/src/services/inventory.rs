//! Inventory service trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderLine;
use tokio::sync::Mutex;

use crate::activity::ActivityError;

/// Soft reservations of stock for staging.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for every line. Returns the reservation id.
    async fn reserve(&self, order_id: &str, lines: &[OrderLine]) -> Result<String, ActivityError>;

    /// Releases the order's reservation. Releasing nothing succeeds.
    async fn release(&self, order_id: &str, reason: &str) -> Result<(), ActivityError>;
}

/// A recorded release call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRelease {
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct InventoryState {
    /// `None` means unlimited stock.
    stock: Option<HashMap<String, u32>>,
    reservations: HashMap<String, (String, Vec<OrderLine>)>,
    next_id: u32,
    reserve_calls: u32,
    reserve_failures: VecDeque<ActivityError>,
    release_failures: VecDeque<ActivityError>,
    releases: Vec<InventoryRelease>,
}

/// In-memory inventory service for tests and local runs.
///
/// Failures queued with `fail_next_*` are returned by the next calls in
/// order, before any real work happens.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks stock per SKU; reserving more than is on hand fails fatally.
    pub async fn set_stock(&self, sku: impl Into<String>, quantity: u32) {
        self.state
            .lock()
            .await
            .stock
            .get_or_insert_with(HashMap::new)
            .insert(sku.into(), quantity);
    }

    pub async fn fail_next_reserve(&self, error: ActivityError) {
        self.state.lock().await.reserve_failures.push_back(error);
    }

    pub async fn fail_next_release(&self, error: ActivityError) {
        self.state.lock().await.release_failures.push_back(error);
    }

    /// Number of reserve calls, failed ones included.
    pub async fn reserve_calls(&self) -> u32 {
        self.state.lock().await.reserve_calls
    }

    pub async fn releases(&self) -> Vec<InventoryRelease> {
        self.state.lock().await.releases.clone()
    }

    pub async fn has_reservation(&self, order_id: &str) -> bool {
        self.state.lock().await.reservations.contains_key(order_id)
    }

    pub async fn available(&self, sku: &str) -> Option<u32> {
        let state = self.state.lock().await;
        state.stock.as_ref().and_then(|stock| stock.get(sku).copied())
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(&self, order_id: &str, lines: &[OrderLine]) -> Result<String, ActivityError> {
        let mut state = self.state.lock().await;
        state.reserve_calls += 1;

        if let Some(error) = state.reserve_failures.pop_front() {
            return Err(error);
        }
        if let Some((reservation_id, _)) = state.reservations.get(order_id) {
            return Ok(reservation_id.clone());
        }

        if let Some(stock) = state.stock.as_mut() {
            for line in lines {
                let available = stock.get(&line.sku).copied().unwrap_or(0);
                if available < line.quantity {
                    return Err(ActivityError::fatal(format!(
                        "insufficient stock for {}: requested {}, available {}",
                        line.sku, line.quantity, available
                    )));
                }
            }
            for line in lines {
                if let Some(available) = stock.get_mut(&line.sku) {
                    *available -= line.quantity;
                }
            }
        }

        state.next_id += 1;
        let reservation_id = format!("INV-{:05}", state.next_id);
        state.reservations.insert(
            order_id.to_string(),
            (reservation_id.clone(), lines.to_vec()),
        );
        Ok(reservation_id)
    }

    async fn release(&self, order_id: &str, reason: &str) -> Result<(), ActivityError> {
        let mut state = self.state.lock().await;
        state.releases.push(InventoryRelease {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        });

        if let Some(error) = state.release_failures.pop_front() {
            return Err(error);
        }

        if let Some((_, lines)) = state.reservations.remove(order_id)
            && let Some(stock) = state.stock.as_mut()
        {
            for line in lines {
                *stock.entry(line.sku).or_default() += line.quantity;
            }
        }
        Ok(())
    }
}
