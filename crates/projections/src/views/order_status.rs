//! Order status view: one record per order tracking where it stands.

use chrono::{DateTime, Utc};
use domain::order::{ORDER_CANCELLED, ORDER_RECEIVED, ORDER_WAVE_ASSIGNED};
use domain::{OrderCancelled, OrderReceived, OrderWaveAssigned};
use outbox::CloudEvent;
use serde::{Deserialize, Serialize};

use crate::projection::Projection;
use crate::{ProjectionError, Result};

/// Denormalized view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusRecord {
    pub order_id: String,
    pub status: String,
    pub customer_id: Option<String>,
    pub priority: Option<String>,
    pub line_count: usize,
    pub wave_id: Option<String>,
    pub cancel_reason: Option<String>,
    /// Time of the newest event folded in.
    pub last_event_time: DateTime<Utc>,
    pub events_applied: u64,
}

impl OrderStatusRecord {
    fn empty(order_id: String, time: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: "unknown".to_string(),
            customer_id: None,
            priority: None,
            line_count: 0,
            wave_id: None,
            cancel_reason: None,
            last_event_time: time,
            events_applied: 0,
        }
    }
}

/// Projects order lifecycle events into [`OrderStatusRecord`]s.
///
/// Events older than the newest one already applied are ignored, so a late
/// `received` never overwrites a `cancelled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderStatusProjection;

impl Projection for OrderStatusProjection {
    type Record = OrderStatusRecord;

    fn name(&self) -> &'static str {
        "order_status"
    }

    fn key(&self, event: &CloudEvent) -> Option<String> {
        match event.event_type.as_str() {
            ORDER_RECEIVED | ORDER_WAVE_ASSIGNED | ORDER_CANCELLED => event
                .data
                .get("orderId")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }

    fn apply(
        &self,
        current: Option<OrderStatusRecord>,
        event: &CloudEvent,
    ) -> Result<OrderStatusRecord> {
        let order_id = self
            .key(event)
            .ok_or_else(|| ProjectionError::Projection(format!("no orderId in {}", event.id)))?;

        let mut record = match current {
            Some(record) if record.last_event_time > event.time => {
                tracing::debug!(order_id = %order_id, event_id = %event.id, "older event ignored");
                return Ok(record);
            }
            Some(record) => record,
            None => OrderStatusRecord::empty(order_id, event.time),
        };

        match event.event_type.as_str() {
            ORDER_RECEIVED => {
                let data: OrderReceived = event.data_as()?;
                record.status = "received".to_string();
                record.customer_id = Some(data.customer_id);
                record.priority = serde_json::to_value(data.priority)?
                    .as_str()
                    .map(str::to_string);
                record.line_count = data.lines.len();
            }
            ORDER_WAVE_ASSIGNED => {
                let data: OrderWaveAssigned = event.data_as()?;
                record.status = "wave_assigned".to_string();
                record.wave_id = Some(data.wave_id);
            }
            ORDER_CANCELLED => {
                let data: OrderCancelled = event.data_as()?;
                record.status = "cancelled".to_string();
                record.cancel_reason = Some(data.reason);
            }
            other => {
                return Err(ProjectionError::Projection(format!(
                    "unexpected event type {other}"
                )));
            }
        }

        record.last_event_time = event.time;
        record.events_applied += 1;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn received(time: DateTime<Utc>) -> CloudEvent {
        let mut event = CloudEvent::new(
            ORDER_RECEIVED,
            "/wms/order-service",
            "order/ORD-001",
            json!({
                "orderId": "ORD-001",
                "customerId": "CUST-1",
                "lines": [{"sku": "SKU-1", "quantity": 2}, {"sku": "SKU-2", "quantity": 1}],
                "priority": "same_day",
                "receivedAt": time,
            }),
        );
        event.time = time;
        event
    }

    fn cancelled(time: DateTime<Utc>) -> CloudEvent {
        let mut event = CloudEvent::new(
            ORDER_CANCELLED,
            "/wms/order-service",
            "order/ORD-001",
            json!({"orderId": "ORD-001", "reason": "customer", "cancelledAt": time}),
        );
        event.time = time;
        event
    }

    #[test]
    fn received_populates_record() {
        let now = Utc::now();
        let record = OrderStatusProjection.apply(None, &received(now)).unwrap();

        assert_eq!(record.order_id, "ORD-001");
        assert_eq!(record.status, "received");
        assert_eq!(record.priority.as_deref(), Some("same_day"));
        assert_eq!(record.line_count, 2);
        assert_eq!(record.events_applied, 1);
    }

    #[test]
    fn older_event_does_not_overwrite_newer_state() {
        let now = Utc::now();
        let record = OrderStatusProjection.apply(None, &cancelled(now)).unwrap();
        let record = OrderStatusProjection
            .apply(Some(record), &received(now - Duration::seconds(5)))
            .unwrap();

        assert_eq!(record.status, "cancelled");
        assert_eq!(record.events_applied, 1);
    }

    #[test]
    fn unrelated_events_have_no_key() {
        let event = CloudEvent::new(
            "wms.wave.created",
            "/wms/waving-service",
            "wave/W-1",
            json!({"waveId": "W-1"}),
        );
        assert_eq!(OrderStatusProjection.key(&event), None);
    }
}
