//! Health check handler.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use warden_core::ProcessState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// State of the active restore, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_state: Option<ProcessState>,
}

/// GET /v1/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        restore_state: state.manager.active_process().map(|p| p.state()),
    })
}
