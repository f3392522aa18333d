// src/api/handlers.rs

//! axum handlers for the control API.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use crate::api::control::{ControlApi, HealthReport, RestartReport, StatusReport};
use crate::api::error::{ApiError, ApiResult};
use crate::state::{ExecutionRecord, TriggerAck};

/// `GET /health`
pub async fn health(State(control): State<ControlApi>) -> Json<HealthReport> {
    Json(control.health())
}

/// `GET /status`
///
/// Per-stage state, timestamps and last error, plus whether anything is
/// running.
pub async fn status(State(control): State<ControlApi>) -> Json<StatusReport> {
    Json(control.status())
}

/// `POST /trigger/{stage_id}`
///
/// - `200` with `{accepted, currentState}`; `accepted` is false when the
///   stage was already pending or running.
/// - `404` for an unknown stage.
pub async fn trigger(
    State(control): State<ControlApi>,
    Path(stage_id): Path<String>,
) -> ApiResult<Json<TriggerAck>> {
    control.trigger(&stage_id).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// `GET /history?limit=N`
///
/// Returns `400` when `limit` is not a non-negative integer.
pub async fn history(
    State(control): State<ControlApi>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ExecutionRecord>>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(control.history(query.limit)))
}

/// `POST /restart`
pub async fn restart(State(control): State<ControlApi>) -> Json<RestartReport> {
    Json(control.restart())
}
