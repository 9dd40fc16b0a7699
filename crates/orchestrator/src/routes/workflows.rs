//! Saga query, signal and cancel endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::WorkflowId;
use saga::{CompensationRecord, SagaFailure, SagaInstance, SignalOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::backend::Backend;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub status: String,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub pending_signals: Vec<String>,
    pub waiting_for: Option<String>,
    pub failure: Option<SagaFailure>,
    pub compensations: Vec<CompensationRecord>,
    pub result: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<SagaInstance> for WorkflowResponse {
    fn from(saga: SagaInstance) -> Self {
        Self {
            workflow_id: saga.workflow_id().to_string(),
            run_id: saga.run_id().to_string(),
            workflow_type: saga.workflow_type().to_string(),
            status: saga.status().as_str().to_string(),
            current_step: saga.current_step().map(str::to_string),
            completed_steps: saga
                .completed_steps()
                .iter()
                .map(|s| s.step.clone())
                .collect(),
            skipped_steps: saga.skipped_steps().to_vec(),
            pending_signals: saga
                .pending_signals()
                .iter()
                .map(|s| s.name.clone())
                .collect(),
            waiting_for: saga.waiting().map(|w| w.signal.clone()),
            failure: saga.failure().cloned(),
            compensations: saga.compensations().to_vec(),
            result: saga.result().cloned(),
            started_at: saga.started_at(),
            closed_at: saga.closed_at(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalParams {
    pub dedup_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub workflow_id: String,
    pub signal: String,
    pub outcome: SignalOutcome,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// GET /workflows/{id}
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let saga = state.engine.query(&WorkflowId::new(id)).await?;
    Ok(Json(saga.into()))
}

/// POST /workflows/{id}/signals/{name}?dedupId=...
///
/// The request body is the signal payload.
#[tracing::instrument(skip(state, payload))]
pub async fn signal<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path((id, name)): Path<(String, String)>,
    Query(params): Query<SignalParams>,
    payload: Option<Json<Value>>,
) -> Result<(StatusCode, Json<SignalResponse>), ApiError> {
    let workflow_id = WorkflowId::new(id);
    let payload = payload.map(|Json(v)| v).unwrap_or(Value::Null);

    let outcome = state
        .engine
        .signal(&workflow_id, &name, payload, params.dedup_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignalResponse {
            workflow_id: workflow_id.to_string(),
            signal: name,
            outcome,
        }),
    ))
}

/// POST /workflows/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    req: Option<Json<CancelRequest>>,
) -> Result<StatusCode, ApiError> {
    let reason = req
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "cancelled by operator".to_string());
    state
        .engine
        .cancel(&WorkflowId::new(id), &reason)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
