//! Order planning workflow.
//!
//! Validates the order, reserves units and inventory, waits for the order
//! to be assigned to a wave, then records the assignment on the order:
//!
//! ```text
//! validate_order → reserve_units → reserve_inventory → wait_for_wave → assign_to_wave
//! ```
//!
//! A failure after a reservation releases it again: `reserve_units` is
//! undone by `ReleaseUnits`, `reserve_inventory` by `ReleaseInventory`.
//! `assign_to_wave` is best effort.

pub mod activities;
pub mod payloads;

use std::time::Duration;

use common::WorkflowId;
use domain::Priority;

use crate::activity::{Activity, ActivityCall, ActivityOptions};
use crate::aggregate::{CompletedStep, SagaFailure, SagaInstance};
use crate::error::{Result, SagaError};
use crate::events::FailureKind;
use crate::payload::{self, Payload};
use crate::workflow::{Compensation, Decision, Workflow};

use activities::{
    AssignToWave, ReleaseInventory, ReleaseUnits, ReserveInventory, ReserveUnits, ValidateOrder,
};
pub use payloads::{
    AssignToWaveInput, InventoryReservation, PlanningInput, PlanningResult, ReleaseInventoryInput,
    ReleaseUnitsInput, ReserveInventoryInput, ReserveUnitsInput, ReservedUnits,
    ValidateOrderInput, WaveAssignment,
};

pub const WORKFLOW_TYPE: &str = "planning";

pub const STEP_VALIDATE_ORDER: &str = "validate_order";
pub const STEP_RESERVE_UNITS: &str = "reserve_units";
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";
pub const STEP_WAIT_FOR_WAVE: &str = "wait_for_wave";
pub const STEP_ASSIGN_TO_WAVE: &str = "assign_to_wave";

/// Signal that resumes a planning saga once its order is in a wave.
pub const WAVE_ASSIGNED_SIGNAL: &str = "waveAssigned";

/// Reason codes passed to release activities.
pub mod reasons {
    pub const ORDER_VALIDATION_FAILED: &str = "order_validation_failed";
    pub const UNIT_RESERVATION_FAILED: &str = "unit_reservation_failed";
    pub const INVENTORY_RESERVATION_FAILED: &str = "inventory_reservation_failed";
    pub const WAVE_ASSIGNMENT_TIMEOUT: &str = "wave_assignment_timeout";
    pub const CANCELLED: &str = "cancelled";
    pub const PLANNING_FAILED: &str = "planning_failed";
}

/// Planning workflow id for an order.
pub fn workflow_id(order_id: &str) -> WorkflowId {
    WorkflowId::for_key(WORKFLOW_TYPE, order_id)
}

/// Timeouts and activity options of the planning workflow.
#[derive(Debug, Clone)]
pub struct PlanningConfig {
    pub wave_timeout_same_day: Duration,
    pub wave_timeout_next_day: Duration,
    pub wave_timeout_default: Duration,
    pub activity_options: ActivityOptions,
    pub compensation_options: ActivityOptions,
}

impl PlanningConfig {
    pub fn wave_timeout(&self, priority: Priority) -> Duration {
        match priority {
            Priority::SameDay => self.wave_timeout_same_day,
            Priority::NextDay => self.wave_timeout_next_day,
            Priority::Standard => self.wave_timeout_default,
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            wave_timeout_same_day: Duration::from_secs(30 * 60),
            wave_timeout_next_day: Duration::from_secs(2 * 60 * 60),
            wave_timeout_default: Duration::from_secs(4 * 60 * 60),
            activity_options: ActivityOptions::default(),
            compensation_options: ActivityOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanningWorkflow {
    config: PlanningConfig,
}

impl PlanningWorkflow {
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    fn execute<P: Payload>(&self, step: &str, activity: &str, input: &P) -> Result<Decision> {
        Ok(Decision::execute(
            step,
            ActivityCall {
                activity: activity.to_string(),
                input: payload::encode(input)?,
            },
            self.config.activity_options.clone(),
        ))
    }

    fn compensate<P: Payload>(&self, activity: &str, input: &P) -> Result<Option<Compensation>> {
        Ok(Some(Compensation {
            call: ActivityCall {
                activity: activity.to_string(),
                input: payload::encode(input)?,
            },
            options: self.config.compensation_options.clone(),
        }))
    }

    fn reserved_units(step: Option<&CompletedStep>) -> Result<Vec<String>> {
        match step {
            Some(step) => Ok(payload::decode::<ReservedUnits>(&step.output)?.unit_ids),
            None => Ok(Vec::new()),
        }
    }

    fn wave_assignment(saga: &SagaInstance) -> Result<WaveAssignment> {
        let step = saga.completed_step(STEP_WAIT_FOR_WAVE).ok_or_else(|| {
            SagaError::Workflow(format!("{STEP_WAIT_FOR_WAVE} has not completed"))
        })?;
        serde_json::from_value(step.output.clone()).map_err(|e| {
            SagaError::Workflow(format!("malformed {WAVE_ASSIGNED_SIGNAL} payload: {e}"))
        })
    }
}

/// Release reason for the step whose failure triggered compensation.
pub fn reason_code(failure: &SagaFailure) -> &'static str {
    if failure.kind == FailureKind::Cancelled {
        return reasons::CANCELLED;
    }
    match failure.step.as_str() {
        STEP_VALIDATE_ORDER => reasons::ORDER_VALIDATION_FAILED,
        STEP_RESERVE_UNITS => reasons::UNIT_RESERVATION_FAILED,
        STEP_RESERVE_INVENTORY => reasons::INVENTORY_RESERVATION_FAILED,
        STEP_WAIT_FOR_WAVE => reasons::WAVE_ASSIGNMENT_TIMEOUT,
        _ => reasons::PLANNING_FAILED,
    }
}

impl Workflow for PlanningWorkflow {
    type Input = PlanningInput;

    fn workflow_type(&self) -> &'static str {
        WORKFLOW_TYPE
    }

    fn workflow_id(&self, input: &PlanningInput) -> WorkflowId {
        workflow_id(&input.order_id)
    }

    fn decide(&self, input: &PlanningInput, saga: &SagaInstance) -> Result<Decision> {
        let order_id = input.order_id.clone();

        if !saga.is_done(STEP_VALIDATE_ORDER) {
            return self.execute(
                STEP_VALIDATE_ORDER,
                ValidateOrder::NAME,
                &ValidateOrderInput {
                    order_id,
                    customer_id: input.customer_id.clone(),
                },
            );
        }

        if !saga.is_done(STEP_RESERVE_UNITS) {
            if !input.unit_ids.is_empty() {
                return Ok(Decision::Record {
                    step: STEP_RESERVE_UNITS.to_string(),
                    output: payload::encode(&ReservedUnits {
                        unit_ids: input.unit_ids.clone(),
                    })?,
                });
            }
            return self.execute(
                STEP_RESERVE_UNITS,
                ReserveUnits::NAME,
                &ReserveUnitsInput {
                    order_id,
                    lines: input.lines.clone(),
                },
            );
        }

        if !saga.is_done(STEP_RESERVE_INVENTORY) {
            return self.execute(
                STEP_RESERVE_INVENTORY,
                ReserveInventory::NAME,
                &ReserveInventoryInput {
                    order_id,
                    lines: input.lines.clone(),
                },
            );
        }

        if !saga.is_done(STEP_WAIT_FOR_WAVE) {
            return Ok(Decision::AwaitSignal {
                step: STEP_WAIT_FOR_WAVE.to_string(),
                signal: WAVE_ASSIGNED_SIGNAL.to_string(),
                timeout: self.config.wave_timeout(input.priority),
            });
        }

        let wave = Self::wave_assignment(saga)?;

        if !saga.is_done(STEP_ASSIGN_TO_WAVE) {
            let call = ActivityCall {
                activity: AssignToWave::NAME.to_string(),
                input: payload::encode(&AssignToWaveInput {
                    order_id,
                    wave_id: wave.wave_id,
                })?,
            };
            return Ok(Decision::best_effort(
                STEP_ASSIGN_TO_WAVE,
                call,
                self.config.activity_options.clone(),
            ));
        }

        let result = PlanningResult {
            order_id,
            wave_id: wave.wave_id,
            scheduled_start: wave.scheduled_start,
            unit_ids: Self::reserved_units(saga.completed_step(STEP_RESERVE_UNITS))?,
        };
        Ok(Decision::Complete {
            result: payload::encode(&result)?,
        })
    }

    fn compensation(
        &self,
        input: &PlanningInput,
        step: &CompletedStep,
        failure: &SagaFailure,
    ) -> Result<Option<Compensation>> {
        let reason = reason_code(failure).to_string();
        match step.step.as_str() {
            STEP_RESERVE_UNITS => self.compensate(
                ReleaseUnits::NAME,
                &ReleaseUnitsInput {
                    order_id: input.order_id.clone(),
                    unit_ids: Self::reserved_units(Some(step))?,
                    reason,
                },
            ),
            STEP_RESERVE_INVENTORY => self.compensate(
                ReleaseInventory::NAME,
                &ReleaseInventoryInput {
                    order_id: input.order_id.clone(),
                    reason,
                },
            ),
            _ => Ok(None),
        }
    }

    fn failure_reason(
        &self,
        input: &PlanningInput,
        step: &str,
        kind: FailureKind,
        cause: &str,
    ) -> String {
        let order_id = &input.order_id;
        if kind == FailureKind::Cancelled {
            return format!("planning cancelled for order {order_id}: {cause}");
        }
        match step {
            STEP_VALIDATE_ORDER => format!("order validation failed for order {order_id}: {cause}"),
            STEP_RESERVE_UNITS => format!("unit reservation failed for order {order_id}: {cause}"),
            STEP_RESERVE_INVENTORY => {
                format!("inventory reservation failed for order {order_id}: {cause}")
            }
            STEP_WAIT_FOR_WAVE => format!("wave assignment timeout for order {order_id}"),
            _ => format!("planning failed for order {order_id} at {step}: {cause}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SagaEvent;
    use chrono::Utc;
    use common::RunId;
    use domain::OrderLine;
    use serde_json::json;

    fn input() -> PlanningInput {
        PlanningInput::new(
            "ORD-001",
            "CUST-1",
            vec![OrderLine::new("SKU-1", 2)],
            Priority::SameDay,
        )
    }

    fn started(input: &PlanningInput) -> SagaInstance {
        SagaInstance::replay(&[SagaEvent::saga_started(
            workflow_id(&input.order_id),
            RunId::new(),
            WORKFLOW_TYPE,
            payload::encode(input).unwrap(),
        )])
        .unwrap()
    }

    fn step_of(decision: &Decision) -> &str {
        decision.step().unwrap_or("complete")
    }

    #[test]
    fn walks_the_steps_in_order() {
        let workflow = PlanningWorkflow::default();
        let input = input();
        let mut saga = started(&input);

        let decision = workflow.decide(&input, &saga).unwrap();
        assert_eq!(step_of(&decision), STEP_VALIDATE_ORDER);
        saga.apply(SagaEvent::step_completed(STEP_VALIDATE_ORDER, None, json!(null), 1));

        let decision = workflow.decide(&input, &saga).unwrap();
        assert_eq!(step_of(&decision), STEP_RESERVE_UNITS);
        let units = payload::encode(&ReservedUnits {
            unit_ids: vec!["U-1".into(), "U-2".into()],
        })
        .unwrap();
        saga.apply(SagaEvent::step_completed(STEP_RESERVE_UNITS, None, units, 1));

        let decision = workflow.decide(&input, &saga).unwrap();
        assert_eq!(step_of(&decision), STEP_RESERVE_INVENTORY);
        saga.apply(SagaEvent::step_completed(STEP_RESERVE_INVENTORY, None, json!(null), 1));

        match workflow.decide(&input, &saga).unwrap() {
            Decision::AwaitSignal { signal, timeout, .. } => {
                assert_eq!(signal, WAVE_ASSIGNED_SIGNAL);
                assert_eq!(timeout, Duration::from_secs(30 * 60));
            }
            other => panic!("expected a signal wait, got {other:?}"),
        }

        let scheduled = Utc::now();
        let signal = crate::signal::Signal::new(
            workflow_id("ORD-001"),
            WAVE_ASSIGNED_SIGNAL,
            json!({"waveId": "W-7", "scheduledStart": scheduled}),
        );
        saga.apply(SagaEvent::SignalReceived(signal.clone()));
        saga.apply(SagaEvent::signal_consumed(STEP_WAIT_FOR_WAVE, signal));

        let decision = workflow.decide(&input, &saga).unwrap();
        assert!(matches!(decision, Decision::Execute { best_effort: true, .. }));
        saga.apply(SagaEvent::step_skipped(STEP_ASSIGN_TO_WAVE, "order service down", 3));

        match workflow.decide(&input, &saga).unwrap() {
            Decision::Complete { result } => {
                let result: PlanningResult = payload::decode(&result).unwrap();
                assert_eq!(result.wave_id, "W-7");
                assert_eq!(result.unit_ids, vec!["U-1", "U-2"]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn pre_reserved_units_are_recorded_without_an_activity() {
        let workflow = PlanningWorkflow::default();
        let input = input().with_unit_ids(vec!["U-9".into()]);
        let mut saga = started(&input);
        saga.apply(SagaEvent::step_completed(STEP_VALIDATE_ORDER, None, json!(null), 1));

        assert!(matches!(
            workflow.decide(&input, &saga).unwrap(),
            Decision::Record { .. }
        ));
    }

    #[test]
    fn compensation_reason_follows_the_failed_step() {
        let workflow = PlanningWorkflow::default();
        let input = input();
        let units = CompletedStep {
            step: STEP_RESERVE_UNITS.into(),
            activity: Some(ReserveUnits::NAME.into()),
            output: payload::encode(&ReservedUnits { unit_ids: vec![] }).unwrap(),
            attempts: 1,
        };
        let failure = SagaFailure {
            step: STEP_RESERVE_INVENTORY.into(),
            reason: "inventory reservation failed for order ORD-001: insufficient stock".into(),
            kind: FailureKind::Fatal,
        };

        let compensation = workflow
            .compensation(&input, &units, &failure)
            .unwrap()
            .unwrap();
        assert_eq!(compensation.call.activity, "ReleaseUnits");
        let release: ReleaseUnitsInput = payload::decode(&compensation.call.input).unwrap();
        assert_eq!(release.reason, reasons::INVENTORY_RESERVATION_FAILED);
        assert!(release.unit_ids.is_empty());

        let cancelled = SagaFailure {
            kind: FailureKind::Cancelled,
            ..failure
        };
        assert_eq!(reason_code(&cancelled), reasons::CANCELLED);
    }

    #[test]
    fn wave_timeouts_follow_priority() {
        let config = PlanningConfig::default();
        assert_eq!(config.wave_timeout(Priority::SameDay), Duration::from_secs(1800));
        assert_eq!(config.wave_timeout(Priority::NextDay), Duration::from_secs(7200));
        assert_eq!(config.wave_timeout(Priority::Standard), Duration::from_secs(14400));
    }
}
