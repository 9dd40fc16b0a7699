//! Wave aggregate: a batch of orders released to the floor together.

mod aggregate;
mod events;

pub use aggregate::Wave;
pub use events::{WAVE_CREATED, WAVE_SOURCE, WAVE_TOPIC, WaveCreated, WaveEvent};

use thiserror::Error;

/// Errors that can occur during wave planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaveError {
    #[error("Wave id is required")]
    MissingWaveId,

    #[error("Wave has no orders")]
    NoOrders,

    #[error("Order {0} appears more than once in the wave")]
    DuplicateOrder(String),
}
