//! Export format introspection.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use warden_core::FormatInfo;

/// GET /v1/db/restore/formats
///
/// Lists every registered format with the files it expects, so clients can
/// validate a manifest before uploading.
pub async fn list_formats(State(state): State<AppState>) -> Json<Vec<FormatInfo>> {
    Json(state.manager.registry().format_listings())
}
