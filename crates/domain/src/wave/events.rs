use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{DomainEvent, EventRoute};

pub const WAVE_TOPIC: &str = "wms.waves.events";
pub const WAVE_SOURCE: &str = "/wms/waving-service";

pub const WAVE_CREATED: &str = "wms.wave.created";

#[derive(Debug, Clone, PartialEq)]
pub enum WaveEvent {
    Created(WaveCreated),
}

impl DomainEvent for WaveEvent {
    fn route(&self) -> EventRoute {
        match self {
            WaveEvent::Created(_) => EventRoute {
                event_type: WAVE_CREATED,
                topic: WAVE_TOPIC,
                source: WAVE_SOURCE,
            },
        }
    }

    fn subject(&self) -> String {
        match self {
            WaveEvent::Created(e) => format!("wave/{}", e.wave_id),
        }
    }

    fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            WaveEvent::Created(e) => serde_json::to_value(e),
        }
    }

    fn wave_number(&self) -> Option<String> {
        match self {
            WaveEvent::Created(e) => Some(e.wave_id.clone()),
        }
    }
}

/// Body of `wms.wave.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveCreated {
    pub wave_id: String,
    pub order_ids: Vec<String>,
    pub scheduled_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
