use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiResult, AppState};
use crate::error::FleetError;
use crate::store::Policy;

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<Policy>> {
    Ok(Json(state.store.policies().list()?))
}

pub async fn get(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Policy> {
    let policy = state
        .store
        .policies()
        .get(&key)?
        .ok_or_else(|| FleetError::not_found(format!("policy {}", key)))?;
    Ok(Json(policy))
}

#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    pub value: Value,
    pub description: Option<String>,
}

pub async fn upsert(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpsertRequest>,
) -> ApiResult<Policy> {
    let policy = state
        .store
        .policies()
        .upsert(&key, &req.value, req.description.as_deref())?;
    Ok(Json(policy))
}
