use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState};
use crate::error::FleetError;
use crate::roundtable::schedule_conversation;
use crate::store::{Conversation, ConversationStatus, ScheduleRequest};

pub async fn schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Conversation> {
    Ok(Json(schedule_conversation(&state.store, &req)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<ConversationStatus>,
    #[serde(default)]
    pub limit: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Conversation>> {
    Ok(Json(
        state.store.roundtable().list(params.status, params.limit)?,
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Conversation> {
    let conversation = state
        .store
        .roundtable()
        .get(&id)?
        .ok_or_else(|| FleetError::not_found(format!("conversation {}", id)))?;
    Ok(Json(conversation))
}
