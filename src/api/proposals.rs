use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState};
use crate::error::FleetError;
use crate::mission::{Mission, MissionProposal, MissionStatus, ProposalStatus};
use crate::proposal::{ProposalOutcome, SubmitProposal};
use crate::store::ProposalFilter;

pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitProposal>,
) -> ApiResult<ProposalOutcome> {
    Ok(Json(state.proposals.submit(req)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<ProposalStatus>,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<MissionProposal>> {
    let proposals = state.store.proposals().list(ProposalFilter {
        status: params.status,
        agent_id: params.agent_id,
        limit: params.limit,
    })?;
    Ok(Json(proposals))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MissionProposal> {
    let proposal = state
        .store
        .proposals()
        .get(&id)?
        .ok_or_else(|| FleetError::not_found(format!("proposal {}", id)))?;
    Ok(Json(proposal))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<ProposalOutcome> {
    Ok(Json(state.proposals.approve(&id, &req.reviewer)?))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<serde_json::Value> {
    state.proposals.reject(&id, &req.reason)?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Debug, Default, Deserialize)]
pub struct MissionListParams {
    pub status: Option<MissionStatus>,
    #[serde(default)]
    pub limit: usize,
}

pub async fn list_missions(
    State(state): State<AppState>,
    Query(params): Query<MissionListParams>,
) -> ApiResult<Vec<Mission>> {
    Ok(Json(state.store.missions().list(params.status, params.limit)?))
}

pub async fn get_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let mission = state
        .store
        .missions()
        .get(&id)?
        .ok_or_else(|| FleetError::not_found(format!("mission {}", id)))?;
    let steps = state.store.steps().for_mission(&id)?;
    Ok(Json(serde_json::json!({"mission": mission, "steps": steps})))
}
