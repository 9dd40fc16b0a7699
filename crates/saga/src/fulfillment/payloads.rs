//! Typed inputs and outputs of the planning workflow and its activities.

use chrono::{DateTime, Utc};
use domain::{OrderLine, Priority};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;

fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

fn check_lines(lines: &[OrderLine]) -> Result<(), String> {
    if lines.is_empty() {
        return Err("at least one line is required".into());
    }
    for line in lines {
        require(&line.sku, "sku")?;
        if line.quantity == 0 {
            return Err(format!("quantity for {} must be positive", line.sku));
        }
    }
    Ok(())
}

/// Input of a planning run. Built from a received order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningInput {
    pub order_id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub priority: Priority,
    /// Units reserved upstream; when present, unit reservation is skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unit_ids: Vec<String>,
}

impl PlanningInput {
    pub fn new(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        lines: Vec<OrderLine>,
        priority: Priority,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            lines,
            priority,
            unit_ids: Vec::new(),
        }
    }

    pub fn with_unit_ids(mut self, unit_ids: Vec<String>) -> Self {
        self.unit_ids = unit_ids;
        self
    }
}

impl Payload for PlanningInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        require(&self.customer_id, "customerId")?;
        check_lines(&self.lines)
    }
}

/// Result of a completed planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningResult {
    pub order_id: String,
    pub wave_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub unit_ids: Vec<String>,
}

impl Payload for PlanningResult {}

/// Payload of the `waveAssigned` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveAssignment {
    pub wave_id: String,
    pub scheduled_start: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOrderInput {
    pub order_id: String,
    pub customer_id: String,
}

impl Payload for ValidateOrderInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveUnitsInput {
    pub order_id: String,
    pub lines: Vec<OrderLine>,
}

impl Payload for ReserveUnitsInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        check_lines(&self.lines)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedUnits {
    pub unit_ids: Vec<String>,
}

impl Payload for ReservedUnits {}

/// Input of the unit release compensation. `unit_ids` may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseUnitsInput {
    pub order_id: String,
    pub unit_ids: Vec<String>,
    pub reason: String,
}

impl Payload for ReleaseUnitsInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        require(&self.reason, "reason")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveInventoryInput {
    pub order_id: String,
    pub lines: Vec<OrderLine>,
}

impl Payload for ReserveInventoryInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        check_lines(&self.lines)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservation {
    pub reservation_id: String,
}

impl Payload for InventoryReservation {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInventoryInput {
    pub order_id: String,
    pub reason: String,
}

impl Payload for ReleaseInventoryInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        require(&self.reason, "reason")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignToWaveInput {
    pub order_id: String,
    pub wave_id: String,
}

impl Payload for AssignToWaveInput {
    fn validate(&self) -> Result<(), String> {
        require(&self.order_id, "orderId")?;
        require(&self.wave_id, "waveId")
    }
}
