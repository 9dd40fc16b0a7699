//! Order aggregate and its events.

mod aggregate;
mod events;

pub use aggregate::{Order, OrderLine, OrderStatus, Priority};
pub use events::{
    ORDER_CANCELLED, ORDER_RECEIVED, ORDER_SOURCE, ORDER_TOPIC, ORDER_WAVE_ASSIGNED,
    OrderCancelled, OrderEvent, OrderReceived, OrderWaveAssigned,
};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order id is required")]
    MissingOrderId,

    #[error("Order has no lines")]
    NoLines,

    #[error("Invalid quantity {quantity} for {sku} (must be greater than 0)")]
    InvalidQuantity { sku: String, quantity: u32 },

    /// Order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {status} state")]
    InvalidStateTransition {
        status: OrderStatus,
        action: &'static str,
    },
}
