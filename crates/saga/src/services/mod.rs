//! Collaborating service traits called by planning activities, with
//! scriptable in-memory implementations.

pub mod inventory;
pub mod orders;
pub mod units;

pub use inventory::{InMemoryInventoryService, InventoryRelease, InventoryService};
pub use orders::{InMemoryOrderService, OrderService};
pub use units::{InMemoryUnitService, UnitRelease, UnitService};
