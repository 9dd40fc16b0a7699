//! Order aggregate implementation.

use chrono::Utc;
use common::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;

use super::{OrderCancelled, OrderError, OrderEvent, OrderReceived, OrderWaveAssigned};

/// Shipping priority of an order. Drives how long planning waits for a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    SameDay,
    NextDay,
    #[default]
    Standard,
}

/// A requested SKU and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Lifecycle of an order as seen by intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Received,
    WaveAssigned,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderStatus::Received => "received",
            OrderStatus::WaveAssigned => "wave_assigned",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Order aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    order_id: String,
    customer_id: String,
    lines: Vec<OrderLine>,
    priority: Priority,
    status: OrderStatus,
    wave_id: Option<String>,

    #[serde(skip)]
    version: Version,

    #[serde(skip)]
    pending: Vec<OrderEvent>,
}

impl Order {
    /// Accepts a new order after validating its lines.
    pub fn receive(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        lines: Vec<OrderLine>,
        priority: Priority,
    ) -> Result<Self, OrderError> {
        let order_id = order_id.into();
        if order_id.trim().is_empty() {
            return Err(OrderError::MissingOrderId);
        }
        if lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                sku: line.sku.clone(),
                quantity: line.quantity,
            });
        }

        let customer_id = customer_id.into();
        let event = OrderEvent::Received(OrderReceived {
            order_id: order_id.clone(),
            customer_id: customer_id.clone(),
            lines: lines.clone(),
            priority,
            received_at: Utc::now(),
        });

        Ok(Self {
            order_id,
            customer_id,
            lines,
            priority,
            status: OrderStatus::Received,
            wave_id: None,
            version: Version::initial(),
            pending: vec![event],
        })
    }

    /// Records the wave the order was planned into.
    ///
    /// Assigning the same wave twice is a no-op.
    pub fn assign_wave(&mut self, wave_id: impl Into<String>) -> Result<(), OrderError> {
        let wave_id = wave_id.into();
        match self.status {
            OrderStatus::WaveAssigned if self.wave_id.as_deref() == Some(wave_id.as_str()) => {
                return Ok(());
            }
            OrderStatus::Received => {}
            status => {
                return Err(OrderError::InvalidStateTransition {
                    status,
                    action: "assign wave",
                });
            }
        }

        self.status = OrderStatus::WaveAssigned;
        self.wave_id = Some(wave_id.clone());
        self.pending.push(OrderEvent::WaveAssigned(OrderWaveAssigned {
            order_id: self.order_id.clone(),
            wave_id,
            assigned_at: Utc::now(),
        }));
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "cancel",
            });
        }

        self.status = OrderStatus::Cancelled;
        self.pending.push(OrderEvent::Cancelled(OrderCancelled {
            order_id: self.order_id.clone(),
            reason: reason.into(),
            cancelled_at: Utc::now(),
        }));
        Ok(())
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn wave_id(&self) -> Option<&str> {
        self.wave_id.as_deref()
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn aggregate_id(&self) -> &str {
        &self.order_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &[OrderEvent] {
        &self.pending
    }

    fn clear_pending_events(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;

    fn order() -> Order {
        Order::receive(
            "ORD-001",
            "CUST-1",
            vec![OrderLine::new("SKU-001", 2)],
            Priority::SameDay,
        )
        .unwrap()
    }

    #[test]
    fn receive_emits_received_event() {
        let order = order();
        assert_eq!(order.status(), OrderStatus::Received);
        assert_eq!(order.pending_events().len(), 1);

        let event = &order.pending_events()[0];
        assert_eq!(event.event_type(), "wms.order.received");
        assert_eq!(event.subject(), "order/ORD-001");
        assert_eq!(event.data().unwrap()["priority"], "same_day");
    }

    #[test]
    fn receive_rejects_empty_and_zero_quantity_orders() {
        assert_eq!(
            Order::receive("ORD-001", "CUST-1", vec![], Priority::Standard).unwrap_err(),
            OrderError::NoLines
        );
        assert!(matches!(
            Order::receive(
                "ORD-001",
                "CUST-1",
                vec![OrderLine::new("SKU-9", 0)],
                Priority::Standard
            ),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
        assert_eq!(
            Order::receive(" ", "CUST-1", vec![OrderLine::new("SKU-1", 1)], Priority::Standard)
                .unwrap_err(),
            OrderError::MissingOrderId
        );
    }

    #[test]
    fn assign_wave_is_idempotent_for_same_wave() {
        let mut order = order();
        order.clear_pending_events();

        order.assign_wave("W-1").unwrap();
        order.assign_wave("W-1").unwrap();

        assert_eq!(order.wave_id(), Some("W-1"));
        assert_eq!(order.pending_events().len(), 1);
        assert_eq!(order.pending_events()[0].wave_number().as_deref(), Some("W-1"));
        assert!(order.assign_wave("W-2").is_err());
    }

    #[test]
    fn cancelled_order_cannot_be_cancelled_or_waved() {
        let mut order = order();
        order.cancel("customer request").unwrap();

        assert!(order.cancel("again").is_err());
        assert!(order.assign_wave("W-1").is_err());
    }

    #[test]
    fn serialized_state_excludes_pending_events() {
        let order = order();
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("pending").is_none());
        assert!(json.get("version").is_none());

        let restored: Order = serde_json::from_value(json).unwrap();
        assert!(restored.pending_events().is_empty());
        assert_eq!(restored.lines(), order.lines());
    }
}
