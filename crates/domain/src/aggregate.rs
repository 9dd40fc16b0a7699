//! Core aggregate and domain event traits.

use common::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Where an event goes once it leaves the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRoute {
    /// Dot-namespaced type, e.g. `wms.order.received`.
    pub event_type: &'static str,
    /// Destination topic on the message bus.
    pub topic: &'static str,
    /// Logical origin path, e.g. `/wms/order-service`.
    pub source: &'static str,
}

/// Trait for domain events.
///
/// Implemented by closed enums: every variant resolves its own route, so the
/// writer never has to inspect concrete event types.
pub trait DomainEvent: Send + Sync + Clone {
    fn route(&self) -> EventRoute;

    /// Primary business key, used as the envelope subject.
    fn subject(&self) -> String;

    /// The JSON body placed in the envelope's `data` field.
    fn data(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn event_type(&self) -> &'static str {
        self.route().event_type
    }

    /// Wave number extension attribute, if the event belongs to a wave.
    fn wave_number(&self) -> Option<String> {
        None
    }
}

/// Trait for state-stored aggregates.
///
/// Business methods mutate the state and push events onto a pending list.
/// The [`Repository`](crate::Repository) persists state and pending events
/// together and then clears the list.
pub trait AggregateRoot: Serialize + DeserializeOwned + Send + Sync {
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    fn aggregate_id(&self) -> &str;

    /// Version the aggregate was loaded at; 0 if never saved.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Events produced since the last successful save.
    fn pending_events(&self) -> &[Self::Event];

    fn clear_pending_events(&mut self);
}
