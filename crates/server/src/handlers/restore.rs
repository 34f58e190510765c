//! Restore upload, resume and control handlers.

use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use futures::TryStreamExt;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use warden_core::{
    AttemptId, InterruptRequest, RestoreHeader, RestoreId, RestoreStatus, ResumeInfo,
};
use warden_restore::{AttemptHandle, PhysicalReader, RestoreProcess};

/// Query parameters of the upload endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// Length of the JSON header prefixing the body.
    pub header_length: Option<u64>,
}

/// Query parameters of the resume endpoint.
#[derive(Debug, Deserialize)]
pub struct ResumeParams {
    pub attempt_id: String,
    pub pos: u64,
    pub checksum: u32,
}

fn body_reader(body: Body) -> PhysicalReader {
    Box::new(StreamReader::new(
        body.into_data_stream().map_err(io::Error::other),
    ))
}

fn parse_restore_id(raw: &str) -> ApiResult<RestoreId> {
    Ok(RestoreId::parse(raw)?)
}

/// Wait for an attempt to end and report the final status on success.
async fn finish_attempt(
    process: Arc<RestoreProcess>,
    attempt: AttemptHandle,
) -> ApiResult<Json<RestoreStatus>> {
    attempt.wait().await?;
    process.wait().await?;
    Ok(Json(process.status()))
}

/// POST /db/v2/restore?header_length=N
///
/// The body is the serialized header followed by the file bytes in manifest
/// order. The response is sent once the restore has finished, or once this
/// connection's attempt has ended.
#[tracing::instrument(skip(state, identity, body), fields(header_length = ?params.header_length))]
pub async fn upload_restore(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    identity: Option<Extension<Identity>>,
    body: Body,
) -> ApiResult<Json<RestoreStatus>> {
    let max = state.config.server.max_header_size;
    let header_length = match params.header_length {
        None => {
            return Err(ApiError::BadRequest(
                "missing header_length query parameter".to_string(),
            ));
        }
        Some(0) => {
            return Err(ApiError::BadRequest(
                "header_length must be greater than zero".to_string(),
            ));
        }
        Some(n) if n > max => {
            return Err(ApiError::BadRequest(format!(
                "header_length {n} exceeds the maximum of {max} bytes"
            )));
        }
        Some(n) => n,
    };

    let mut reader = body_reader(body);
    let mut buf = vec![0u8; header_length as usize];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ApiError::BadRequest("body ended before the restore header".to_string())
        } else {
            ApiError::BadRequest(format!("failed to read restore header: {e}"))
        }
    })?;
    let header = RestoreHeader::from_slice(&buf)?;

    let user = identity.map(|Extension(Identity(user))| user);
    let (process, attempt) = state
        .manager
        .launch_restore_process(header, reader, user)?;
    metrics::track_restore(process.clone());

    tracing::info!(
        restore_id = %process.id(),
        attempt_id = %attempt.attempt_id(),
        "Restore upload attached"
    );
    finish_attempt(process, attempt).await
}

/// POST /db/v2/restore/{id}/resume?attempt_id=&pos=&checksum=
///
/// The body continues the logical stream at `pos`.
#[tracing::instrument(skip(state, body), fields(restore_id = %id, attempt_id = %params.attempt_id, position = params.pos))]
pub async fn resume_restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ResumeParams>,
    body: Body,
) -> ApiResult<Json<RestoreStatus>> {
    let id = parse_restore_id(&id)?;
    let previous = AttemptId::parse(&params.attempt_id)?;

    let reader = body_reader(body);
    let result = state
        .manager
        .resume(id, &previous, reader, params.pos, params.checksum)
        .await;
    metrics::record_resume(result.is_ok());
    let (process, attempt) = result?;

    tracing::info!(new_attempt_id = %attempt.attempt_id(), "Restore resumed");
    finish_attempt(process, attempt).await
}

/// GET /v1/db/restore/active
#[tracing::instrument(skip(state))]
pub async fn get_active_restore(State(state): State<AppState>) -> ApiResult<Json<RestoreStatus>> {
    state
        .manager
        .active_process()
        .map(|process| Json(process.status()))
        .ok_or_else(|| ApiError::NotFound("no active restore process".to_string()))
}

/// GET /v1/db/restore/{id}
#[tracing::instrument(skip(state), fields(restore_id = %id))]
pub async fn get_restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RestoreStatus>> {
    let id = parse_restore_id(&id)?;
    let process = state.manager.get_process(id)?;
    Ok(Json(process.status()))
}

/// POST /v1/db/restore/{id}/interrupt
#[tracing::instrument(skip(state, req), fields(restore_id = %id, attempt_id = %req.attempt_id))]
pub async fn interrupt_restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InterruptRequest>,
) -> ApiResult<Json<ResumeInfo>> {
    let id = parse_restore_id(&id)?;
    let info = state.manager.interrupt(id, &req.attempt_id).await?;
    metrics::INTERRUPTS.inc();
    tracing::info!(position = info.pos, "Restore attempt interrupted");
    Ok(Json(info))
}

/// DELETE /v1/db/restore/{id}
#[tracing::instrument(skip(state), fields(restore_id = %id))]
pub async fn cancel_restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_restore_id(&id)?;
    state.manager.cancel(id)?;
    tracing::info!("Restore canceled");
    Ok(StatusCode::NO_CONTENT)
}
