//! Upload workflow API handlers
//!
//! POST /upload/start, POST /upload/retry, POST /upload/cancel,
//! GET /upload/status, GET|DELETE /upload/failed

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{IdentityRecord, RunDefaults},
    services::{RecordInput, SupervisorStatus, UploadRequest},
    AppState,
};

/// POST /upload/start request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    /// Input file; omitted, missing or a directory collects the local machine
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub fallback_serial: Option<String>,
    #[serde(default)]
    pub defaults: RunDefaults,
}

/// Response of start and retry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub run_id: Uuid,
    pub retry: bool,
    pub started_at: DateTime<Utc>,
}

/// POST /upload/cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadResponse {
    pub run_id: Uuid,
    pub cancelled_at: DateTime<Utc>,
}

/// GET /upload/failed response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecordsResponse {
    pub count: usize,
    pub records: Vec<IdentityRecord>,
}

/// DELETE /upload/failed response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearFailedResponse {
    pub cleared: usize,
}

/// POST /upload/start
///
/// Returns 202 Accepted with the run id, 409 while another run is active.
pub async fn start_upload(
    State(state): State<AppState>,
    Json(request): Json<StartUploadRequest>,
) -> ApiResult<(StatusCode, Json<StartUploadResponse>)> {
    let file = request
        .file_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let upload = UploadRequest {
        input: RecordInput::File(file),
        fallback_serial: request
            .fallback_serial
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        defaults: request.defaults,
    };

    let handle = state.supervisor.start(upload)?;
    tracing::info!(run_id = %handle.run_id, "Upload accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartUploadResponse {
            run_id: handle.run_id,
            retry: false,
            started_at: handle.started_at,
        }),
    ))
}

/// POST /upload/retry
///
/// Replays the failed records of the last run; 400 when there are none.
pub async fn retry_upload(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<StartUploadResponse>)> {
    let handle = state.supervisor.start_retry()?;
    tracing::info!(run_id = %handle.run_id, "Retry accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartUploadResponse {
            run_id: handle.run_id,
            retry: true,
            started_at: handle.started_at,
        }),
    ))
}

/// POST /upload/cancel
pub async fn cancel_upload(State(state): State<AppState>) -> ApiResult<Json<CancelUploadResponse>> {
    let run_id = state
        .supervisor
        .cancel()
        .ok_or_else(|| ApiError::NotFound("No upload is running".to_string()))?;

    Ok(Json(CancelUploadResponse {
        run_id,
        cancelled_at: Utc::now(),
    }))
}

/// GET /upload/status
pub async fn upload_status(State(state): State<AppState>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status())
}

/// GET /upload/failed
pub async fn failed_records(State(state): State<AppState>) -> Json<FailedRecordsResponse> {
    let records = state.supervisor.failed_records();
    Json(FailedRecordsResponse {
        count: records.len(),
        records,
    })
}

/// DELETE /upload/failed
pub async fn clear_failed(State(state): State<AppState>) -> Json<ClearFailedResponse> {
    let cleared = state.supervisor.clear_failed();
    tracing::info!(cleared, "Retained failed records cleared");
    Json(ClearFailedResponse { cleared })
}

/// Build upload workflow routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload/start", post(start_upload))
        .route("/upload/retry", post(retry_upload))
        .route("/upload/cancel", post(cancel_upload))
        .route("/upload/status", get(upload_status))
        .route("/upload/failed", get(failed_records).delete(clear_failed))
}
