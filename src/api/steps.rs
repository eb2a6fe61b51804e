use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::mission::{MissionStep, StepKind, StepStatus};

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub executor_agent: String,
    /// Restrict the claim to these kinds. Absent means any kind.
    pub kinds: Option<Vec<StepKind>>,
}

pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Option<MissionStep>> {
    let step = state
        .queue
        .claim(&req.worker_id, &req.executor_agent, req.kinds.as_deref())?;
    Ok(Json(step))
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub status: StepStatus,
    pub result: Option<Value>,
    pub failure_reason: Option<String>,
}

pub async fn report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<Value> {
    let mission_status = state.queue.report(
        &id,
        req.status,
        req.result.as_ref(),
        req.failure_reason.as_deref(),
    )?;
    Ok(Json(json!({"success": true, "mission_status": mission_status})))
}

pub async fn retry(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    state.queue.retry(&id)?;
    Ok(Json(json!({"success": true})))
}
