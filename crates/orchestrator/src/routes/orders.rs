//! Order intake, status and cancellation endpoints.
//!
//! Writes go through the outbox: the handlers only save the aggregate, and
//! the planning saga reacts to the published events.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Order, OrderLine, Priority};
use projections::OrderStatusRecord;
use saga::fulfillment;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::backend::Backend;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub customer_id: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Deserialize, Default)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAcceptedResponse {
    pub order_id: String,
    pub workflow_id: String,
    pub status: String,
}

// -- Handlers --

/// POST /orders
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn create<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    if state.orders.load(&req.order_id).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "order {} already exists",
            req.order_id
        )));
    }

    let mut order = Order::receive(req.order_id, req.customer_id, req.lines, req.priority)
        .map_err(domain::DomainError::from)?;
    state.orders.save(&mut order).await?;
    tracing::info!("order received");

    Ok((StatusCode::ACCEPTED, Json(accepted(&order))))
}

/// GET /orders/{id}, served from the order-status read model.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusRecord>, ApiError> {
    state
        .order_status
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    req: Option<Json<CancelOrderRequest>>,
) -> Result<(StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    let reason = req
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "cancelled by request".to_string());

    let mut order = state.orders.get(&id).await?;
    order.cancel(reason).map_err(domain::DomainError::from)?;
    state.orders.save(&mut order).await?;
    tracing::info!("order cancelled");

    Ok((StatusCode::ACCEPTED, Json(accepted(&order))))
}

fn accepted(order: &Order) -> OrderAcceptedResponse {
    OrderAcceptedResponse {
        order_id: order.order_id().to_string(),
        workflow_id: fulfillment::workflow_id(order.order_id()).to_string(),
        status: order.status().to_string(),
    }
}
