//! CloudEvents 1.0 envelope used on the wire for every published event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::EventId;

pub const SPEC_VERSION: &str = "1.0";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Envelope for a published domain event.
///
/// Consumers deduplicate on [`CloudEvent::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    #[serde(rename = "specversion")]
    pub spec_version: String,

    pub id: EventId,

    /// Dot-namespaced type, e.g. `wms.order.received`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Logical origin, e.g. `/wms/order-service`.
    pub source: String,

    /// Primary business key, e.g. `order/ORD-001`.
    pub subject: String,

    pub time: DateTime<Utc>,

    #[serde(rename = "datacontenttype")]
    pub data_content_type: String,

    pub data: serde_json::Value,

    #[serde(
        rename = "correlationid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,

    #[serde(rename = "workflowid", default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(rename = "wavenumber", default, skip_serializing_if = "Option::is_none")]
    pub wave_number: Option<String>,
}

impl CloudEvent {
    /// Creates an envelope with a fresh id and the current time.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            id: EventId::new(),
            event_type: event_type.into(),
            source: source.into(),
            subject: subject.into(),
            time: Utc::now(),
            data_content_type: JSON_CONTENT_TYPE.to_string(),
            data,
            correlation_id: None,
            workflow_id: None,
            wave_number: None,
        }
    }

    /// Creates an envelope by serializing a typed payload.
    pub fn with_data<T: Serialize>(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event_type,
            source,
            subject,
            serde_json::to_value(data)?,
        ))
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_wave_number(mut self, wave_number: impl Into<String>) -> Self {
        self.wave_number = Some(wave_number.into());
        self
    }

    /// Deserializes the `data` field into a typed payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
