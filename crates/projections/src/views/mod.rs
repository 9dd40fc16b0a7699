//! Read model views.

mod order_status;

pub use order_status::{OrderStatusProjection, OrderStatusRecord};
