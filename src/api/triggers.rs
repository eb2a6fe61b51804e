use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::error::FleetError;
use crate::store::{NewTriggerRule, TriggerRule, TriggerRuleUpdate};

pub async fn create(
    State(state): State<AppState>,
    Json(rule): Json<NewTriggerRule>,
) -> ApiResult<TriggerRule> {
    Ok(Json(state.store.triggers().insert(rule)?))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<TriggerRule>> {
    Ok(Json(state.store.triggers().list()?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TriggerRule> {
    let rule = state
        .store
        .triggers()
        .get(&id)?
        .ok_or_else(|| FleetError::not_found(format!("trigger rule {}", id)))?;
    Ok(Json(rule))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TriggerRuleUpdate>,
) -> ApiResult<TriggerRule> {
    let rule = state
        .store
        .triggers()
        .update(&id, update)?
        .ok_or_else(|| FleetError::not_found(format!("trigger rule {}", id)))?;
    Ok(Json(rule))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    if !state.store.triggers().delete(&id)? {
        return Err(FleetError::not_found(format!("trigger rule {}", id)).into());
    }
    Ok(Json(json!({"success": true})))
}
