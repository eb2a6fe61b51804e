use axum::extract::State;
use axum::Json;

use super::{ApiResult, AppState};
use crate::heartbeat::HeartbeatReport;

pub async fn run(State(state): State<AppState>) -> ApiResult<HeartbeatReport> {
    let mut heartbeat = state.heartbeat.lock().await;
    Ok(Json(heartbeat.run()))
}
