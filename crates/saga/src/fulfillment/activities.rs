//! Planning activities. Each one adapts a collaborating service to the
//! typed activity contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};
use crate::services::{InventoryService, OrderService, UnitService};

use super::payloads::{
    AssignToWaveInput, InventoryReservation, ReleaseInventoryInput, ReleaseUnitsInput,
    ReserveInventoryInput, ReserveUnitsInput, ReservedUnits, ValidateOrderInput,
};

pub struct ValidateOrder(pub Arc<dyn OrderService>);

#[async_trait]
impl Activity for ValidateOrder {
    type Input = ValidateOrderInput;
    type Output = ();

    const NAME: &'static str = "ValidateOrder";

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: ValidateOrderInput,
    ) -> Result<(), ActivityError> {
        self.0.validate(&input.order_id).await
    }
}

pub struct ReserveUnits(pub Arc<dyn UnitService>);

#[async_trait]
impl Activity for ReserveUnits {
    type Input = ReserveUnitsInput;
    type Output = ReservedUnits;

    const NAME: &'static str = "ReserveUnits";

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: ReserveUnitsInput,
    ) -> Result<ReservedUnits, ActivityError> {
        let unit_ids = self.0.reserve(&input.order_id, &input.lines).await?;
        tracing::debug!(
            order_id = %input.order_id,
            attempt = ctx.attempt,
            units = unit_ids.len(),
            "units reserved"
        );
        Ok(ReservedUnits { unit_ids })
    }
}

pub struct ReleaseUnits(pub Arc<dyn UnitService>);

#[async_trait]
impl Activity for ReleaseUnits {
    type Input = ReleaseUnitsInput;
    type Output = ();

    const NAME: &'static str = "ReleaseUnits";

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: ReleaseUnitsInput,
    ) -> Result<(), ActivityError> {
        tracing::info!(
            order_id = %input.order_id,
            reason = %input.reason,
            units = input.unit_ids.len(),
            "releasing unit reservations"
        );
        self.0
            .release(&input.order_id, &input.unit_ids, &input.reason)
            .await
    }
}

pub struct ReserveInventory(pub Arc<dyn InventoryService>);

#[async_trait]
impl Activity for ReserveInventory {
    type Input = ReserveInventoryInput;
    type Output = InventoryReservation;

    const NAME: &'static str = "ReserveInventory";

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: ReserveInventoryInput,
    ) -> Result<InventoryReservation, ActivityError> {
        let reservation_id = self.0.reserve(&input.order_id, &input.lines).await?;
        Ok(InventoryReservation { reservation_id })
    }
}

pub struct ReleaseInventory(pub Arc<dyn InventoryService>);

#[async_trait]
impl Activity for ReleaseInventory {
    type Input = ReleaseInventoryInput;
    type Output = ();

    const NAME: &'static str = "ReleaseInventory";

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: ReleaseInventoryInput,
    ) -> Result<(), ActivityError> {
        tracing::info!(order_id = %input.order_id, reason = %input.reason, "releasing inventory");
        self.0.release(&input.order_id, &input.reason).await
    }
}

pub struct AssignToWave(pub Arc<dyn OrderService>);

#[async_trait]
impl Activity for AssignToWave {
    type Input = AssignToWaveInput;
    type Output = ();

    const NAME: &'static str = "AssignToWave";

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: AssignToWaveInput,
    ) -> Result<(), ActivityError> {
        self.0.assign_to_wave(&input.order_id, &input.wave_id).await
    }
}

/// Registers every planning activity against the given services.
pub fn register(
    registry: ActivityRegistry,
    orders: Arc<dyn OrderService>,
    units: Arc<dyn UnitService>,
    inventory: Arc<dyn InventoryService>,
) -> ActivityRegistry {
    registry
        .register(ValidateOrder(orders.clone()))
        .register(ReserveUnits(units.clone()))
        .register(ReleaseUnits(units))
        .register(ReserveInventory(inventory.clone()))
        .register(ReleaseInventory(inventory))
        .register(AssignToWave(orders))
}
