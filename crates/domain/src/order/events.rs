//! Order domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{DomainEvent, EventRoute};

use super::{OrderLine, Priority};

pub const ORDER_TOPIC: &str = "wms.orders.events";
pub const ORDER_SOURCE: &str = "/wms/order-service";

pub const ORDER_RECEIVED: &str = "wms.order.received";
pub const ORDER_WAVE_ASSIGNED: &str = "wms.order.wave-assigned";
pub const ORDER_CANCELLED: &str = "wms.order.cancelled";

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Received(OrderReceived),
    WaveAssigned(OrderWaveAssigned),
    Cancelled(OrderCancelled),
}

impl DomainEvent for OrderEvent {
    fn route(&self) -> EventRoute {
        let event_type = match self {
            OrderEvent::Received(_) => ORDER_RECEIVED,
            OrderEvent::WaveAssigned(_) => ORDER_WAVE_ASSIGNED,
            OrderEvent::Cancelled(_) => ORDER_CANCELLED,
        };
        EventRoute {
            event_type,
            topic: ORDER_TOPIC,
            source: ORDER_SOURCE,
        }
    }

    fn subject(&self) -> String {
        let order_id = match self {
            OrderEvent::Received(e) => &e.order_id,
            OrderEvent::WaveAssigned(e) => &e.order_id,
            OrderEvent::Cancelled(e) => &e.order_id,
        };
        format!("order/{order_id}")
    }

    fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            OrderEvent::Received(e) => serde_json::to_value(e),
            OrderEvent::WaveAssigned(e) => serde_json::to_value(e),
            OrderEvent::Cancelled(e) => serde_json::to_value(e),
        }
    }

    fn wave_number(&self) -> Option<String> {
        match self {
            OrderEvent::WaveAssigned(e) => Some(e.wave_id.clone()),
            _ => None,
        }
    }
}

/// Body of `wms.order.received`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceived {
    pub order_id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
    pub priority: Priority,
    pub received_at: DateTime<Utc>,
}

/// Body of `wms.order.wave-assigned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWaveAssigned {
    pub order_id: String,
    pub wave_id: String,
    pub assigned_at: DateTime<Utc>,
}

/// Body of `wms.order.cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: String,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}
