//! Core projection trait.

use outbox::CloudEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// A read model built by folding events into keyed records.
///
/// [`Projection::apply`] must be a pure function of the current record and
/// the event. Storage, deduplication and atomicity are handled by
/// [`IdempotentProjector`](crate::IdempotentProjector).
pub trait Projection: Send + Sync {
    type Record: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Returns the name of this projection. Used as the storage namespace.
    fn name(&self) -> &'static str;

    /// Key of the record this event updates, or `None` to ignore the event.
    fn key(&self, event: &CloudEvent) -> Option<String>;

    /// Computes the next record from the current one.
    fn apply(&self, current: Option<Self::Record>, event: &CloudEvent) -> Result<Self::Record>;
}
