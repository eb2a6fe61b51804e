use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState};
use crate::store::{AgentRelationship, DriftResult};

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<AgentRelationship>> {
    Ok(Json(state.store.relationships().all()?))
}

pub async fn get(
    State(state): State<AppState>,
    Path((a, b)): Path<(String, String)>,
) -> ApiResult<AgentRelationship> {
    Ok(Json(state.store.relationships().get(&a, &b)?))
}

#[derive(Debug, Deserialize)]
pub struct DriftRequest {
    pub agent_a: String,
    pub agent_b: String,
    pub delta: f64,
    pub reason: String,
}

pub async fn drift(
    State(state): State<AppState>,
    Json(req): Json<DriftRequest>,
) -> ApiResult<DriftResult> {
    let result = state.store.relationships().apply_drift(
        &req.agent_a,
        &req.agent_b,
        req.delta,
        &req.reason,
        state.drift_bounds,
    )?;
    Ok(Json(result))
}
