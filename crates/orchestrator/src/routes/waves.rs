//! Wave planning endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{DomainError, Wave};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::backend::Backend;
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWaveRequest {
    pub wave_id: String,
    pub order_ids: Vec<String>,
    /// Defaults to now.
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveCreatedResponse {
    pub wave_id: String,
    pub order_count: usize,
    pub scheduled_start: DateTime<Utc>,
}

/// POST /waves
///
/// Saves the wave; each listed order's planning saga receives
/// `waveAssigned` once the `wms.wave.created` event is published.
#[tracing::instrument(skip(state, req), fields(wave_id = %req.wave_id))]
pub async fn create<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<CreateWaveRequest>,
) -> Result<(StatusCode, Json<WaveCreatedResponse>), ApiError> {
    if state.waves.load(&req.wave_id).await?.is_some() {
        return Err(ApiError::Conflict(format!("wave {} already exists", req.wave_id)));
    }

    let scheduled_start = req.scheduled_start.unwrap_or_else(Utc::now);
    let mut wave =
        Wave::plan(req.wave_id, req.order_ids, scheduled_start).map_err(DomainError::from)?;
    state.waves.save(&mut wave).await?;
    tracing::info!(orders = wave.order_ids().len(), "wave planned");

    Ok((
        StatusCode::ACCEPTED,
        Json(WaveCreatedResponse {
            wave_id: wave.wave_id().to_string(),
            order_count: wave.order_ids().len(),
            scheduled_start: wave.scheduled_start(),
        }),
    ))
}
