use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloudevent::CloudEvent;

/// Unique identifier for an event.
///
/// The same id is used for the outbox row and the published envelope, so
/// consumers can deduplicate on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One domain fact awaiting (or done with) delivery.
///
/// Rows are created inside the same transaction as the aggregate change that
/// produced them and are afterwards only touched by the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,

    /// Serialized envelope, opaque to the store.
    pub payload: Vec<u8>,

    /// Destination topic on the message bus.
    pub topic: String,

    /// Partition key. Rows sharing a key are published in write order.
    pub routing_key: String,

    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,

    /// Insertion sequence assigned by the store; 0 until persisted.
    pub position: i64,

    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Creates a builder for constructing outbox rows.
    pub fn builder() -> OutboxEventBuilder {
        OutboxEventBuilder::new()
    }

    /// Wraps a CloudEvent into an outbox row keyed by its aggregate.
    pub fn from_cloud_event(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        topic: impl Into<String>,
        event: &CloudEvent,
    ) -> Result<Self, serde_json::Error> {
        let aggregate_id = aggregate_id.into();
        Ok(Self::builder()
            .id(event.id)
            .routing_key(aggregate_id.clone())
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .event_type(event.event_type.clone())
            .topic(topic)
            .created_at(event.time)
            .payload_raw(event.to_bytes()?)
            .build())
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Decodes the payload as a CloudEvent.
    pub fn cloud_event(&self) -> Result<CloudEvent, serde_json::Error> {
        CloudEvent::from_bytes(&self.payload)
    }
}

/// Builder for constructing [`OutboxEvent`] instances.
#[derive(Debug, Default)]
pub struct OutboxEventBuilder {
    id: Option<EventId>,
    aggregate_id: Option<String>,
    aggregate_type: Option<String>,
    event_type: Option<String>,
    payload: Option<Vec<u8>>,
    topic: Option<String>,
    routing_key: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl OutboxEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the routing key. Defaults to the aggregate id.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sets the payload by serializing a value to JSON bytes.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_vec(payload)?);
        Ok(self)
    }

    /// Sets already serialized payload bytes.
    pub fn payload_raw(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the row.
    ///
    /// Missing fields fall back to empty values, a fresh id and the current time.
    pub fn build(self) -> OutboxEvent {
        let aggregate_id = self.aggregate_id.unwrap_or_default();
        OutboxEvent {
            id: self.id.unwrap_or_default(),
            routing_key: self.routing_key.unwrap_or_else(|| aggregate_id.clone()),
            aggregate_id,
            aggregate_type: self.aggregate_type.unwrap_or_default(),
            event_type: self.event_type.unwrap_or_default(),
            payload: self.payload.unwrap_or_default(),
            topic: self.topic.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            published_at: None,
            retry_count: 0,
            last_error: None,
            position: 0,
            claimed_by: None,
            claimed_until: None,
        }
    }
}
