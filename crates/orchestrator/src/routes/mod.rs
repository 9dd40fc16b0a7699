//! HTTP handlers.

pub mod ops;
pub mod orders;
pub mod waves;
pub mod workflows;
