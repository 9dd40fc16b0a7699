use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;

use super::{WaveCreated, WaveError, WaveEvent};

/// Wave aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    wave_id: String,
    order_ids: Vec<String>,
    scheduled_start: DateTime<Utc>,

    #[serde(skip)]
    version: Version,

    #[serde(skip)]
    pending: Vec<WaveEvent>,
}

impl Wave {
    /// Plans a wave over the given orders.
    pub fn plan(
        wave_id: impl Into<String>,
        order_ids: Vec<String>,
        scheduled_start: DateTime<Utc>,
    ) -> Result<Self, WaveError> {
        let wave_id = wave_id.into();
        if wave_id.trim().is_empty() {
            return Err(WaveError::MissingWaveId);
        }
        if order_ids.is_empty() {
            return Err(WaveError::NoOrders);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = order_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(WaveError::DuplicateOrder(dup.clone()));
        }

        let event = WaveEvent::Created(WaveCreated {
            wave_id: wave_id.clone(),
            order_ids: order_ids.clone(),
            scheduled_start,
            created_at: Utc::now(),
        });

        Ok(Self {
            wave_id,
            order_ids,
            scheduled_start,
            version: Version::initial(),
            pending: vec![event],
        })
    }

    pub fn wave_id(&self) -> &str {
        &self.wave_id
    }

    pub fn order_ids(&self) -> &[String] {
        &self.order_ids
    }

    pub fn scheduled_start(&self) -> DateTime<Utc> {
        self.scheduled_start
    }
}

impl AggregateRoot for Wave {
    type Event = WaveEvent;

    fn aggregate_type() -> &'static str {
        "Wave"
    }

    fn aggregate_id(&self) -> &str {
        &self.wave_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &[WaveEvent] {
        &self.pending
    }

    fn clear_pending_events(&mut self) {
        self.pending.clear();
    }
}
