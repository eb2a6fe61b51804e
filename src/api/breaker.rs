use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::store::BreakerRow;

pub async fn state(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<BreakerRow> {
    Ok(Json(state.breaker.state(&service)?))
}

pub async fn check(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<Value> {
    let can_proceed = state.breaker.can_proceed(&service)?;
    Ok(Json(json!({"service": service, "can_proceed": can_proceed})))
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub success: bool,
}

pub async fn record(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(req): Json<RecordRequest>,
) -> ApiResult<BreakerRow> {
    Ok(Json(state.breaker.record(&service, req.success)?))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<BreakerRow> {
    Ok(Json(state.breaker.reset(&service)?))
}
