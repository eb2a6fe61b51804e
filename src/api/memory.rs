use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::error::FleetError;
use crate::store::{AgentMemory, MemoryInsert, MemoryQuery, MemoryType, MemoryWrite};

pub async fn insert(
    State(state): State<AppState>,
    Json(mem): Json<MemoryInsert>,
) -> ApiResult<Value> {
    let write = state.store.memories().insert(mem, state.memory_limits)?;
    let body = match write {
        MemoryWrite::Inserted { id, evicted } => {
            json!({"success": true, "id": id, "evicted": evicted})
        }
        MemoryWrite::Duplicate { existing_id } => {
            json!({"success": true, "id": existing_id, "deduplicated": true})
        }
        MemoryWrite::BelowConfidence => {
            json!({"success": false, "reason": "confidence below admission floor"})
        }
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub tag: Option<String>,
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub include_superseded: bool,
    #[serde(default)]
    pub limit: usize,
}

pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Vec<AgentMemory>> {
    let memories = state.store.memories().query(&MemoryQuery {
        agent_id: params.agent_id,
        memory_type: params.memory_type,
        tag: params.tag,
        min_confidence: params.min_confidence,
        include_superseded: params.include_superseded,
        limit: params.limit,
    })?;
    Ok(Json(memories))
}

#[derive(Debug, Default, Deserialize)]
pub struct SupersedeParams {
    pub replaced_by: Option<String>,
}

pub async fn supersede(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SupersedeParams>,
) -> ApiResult<Value> {
    let marker = params
        .replaced_by
        .unwrap_or_else(|| crate::store::EVICTED_MARKER.to_string());
    if !state.store.memories().supersede(&id, &marker)? {
        return Err(FleetError::conflict(format!(
            "memory {} is missing or already superseded",
            id
        ))
        .into());
    }
    Ok(Json(json!({"success": true})))
}
