//! HTTP JSON surface.
//!
//! Thin axum handlers over the services; governance logic stays in the
//! services and the store. Auth is a single `x-api-key` header check.

mod breaker;
mod heartbeat;
mod memory;
mod policy;
mod proposals;
mod relationships;
mod roundtable;
mod steps;
mod triggers;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::breaker::CircuitBreaker;
use crate::error::{FleetError, Result};
use crate::heartbeat::Heartbeat;
use crate::proposal::ProposalService;
use crate::queue::StepQueue;
use crate::store::{DriftBounds, MemoryLimits, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub proposals: Arc<ProposalService>,
    pub queue: Arc<StepQueue>,
    pub breaker: Arc<CircuitBreaker>,
    pub heartbeat: Arc<Mutex<Heartbeat>>,
    pub memory_limits: MemoryLimits,
    pub drift_bounds: DriftBounds,
    pub api_key: Option<Arc<String>>,
}

/// Handler error shell. Validation, missing-record, and conflict failures
/// surface with their reason; everything else collapses to a generic 500
/// so store internals never leak.
pub struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self.0 {
            FleetError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FleetError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            FleetError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            other => {
                error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({"success": false, "reason": reason}))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let presented = request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"success": false, "reason": "invalid api key"})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/proposals", post(proposals::submit).get(proposals::list))
        .route("/proposals/:id", get(proposals::get))
        .route("/proposals/:id/approve", patch(proposals::approve))
        .route("/proposals/:id/reject", patch(proposals::reject))
        .route("/missions", get(proposals::list_missions))
        .route("/missions/:id", get(proposals::get_mission))
        .route("/steps/claim", post(steps::claim))
        .route("/steps/:id/report", patch(steps::report))
        .route("/steps/:id/retry", post(steps::retry))
        .route("/breaker/:service", get(breaker::state))
        .route("/breaker/:service/check", post(breaker::check))
        .route("/breaker/:service/record", post(breaker::record))
        .route("/breaker/:service/reset", post(breaker::reset))
        .route("/triggers", post(triggers::create).get(triggers::list))
        .route(
            "/triggers/:id",
            get(triggers::get).patch(triggers::update).delete(triggers::remove),
        )
        .route("/memories", post(memory::insert).get(memory::query))
        .route("/memories/:id", delete(memory::supersede))
        .route("/relationships", get(relationships::list))
        .route("/relationships/drift", post(relationships::drift))
        .route("/relationships/:a/:b", get(relationships::get))
        .route(
            "/conversations",
            post(roundtable::schedule).get(roundtable::list),
        )
        .route("/conversations/:id", get(roundtable::get))
        .route("/policies", get(policy::list))
        .route("/policies/:key", get(policy::get).patch(policy::upsert))
        .route("/heartbeat", post(heartbeat::run))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(FleetError::from)?;
    info!(%bind, "api listening");
    axum::serve(listener, router(state))
        .await
        .map_err(FleetError::from)?;
    Ok(())
}
