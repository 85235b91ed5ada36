//! Health check endpoint
//!
//! Reports whether the worker slot is taken and how the last run ended, so a
//! monitor can tell an idle service from one stuck on a run or one whose
//! last run aborted.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::UploadOutcome;
use crate::AppState;

/// Short form of the last finished run
#[derive(Debug, Serialize)]
pub struct LastRunHealth {
    pub run_id: Uuid,
    pub success: bool,
    pub blocked: bool,
    pub ended_at: DateTime<Utc>,
    /// Run-level abort reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<UploadOutcome> for LastRunHealth {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            success: outcome.success,
            blocked: outcome.blocked,
            ended_at: outcome.ended_at,
            error: outcome.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" when idle, "busy" while an upload runs
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_run: Option<Uuid>,
    /// Records a retry would replay
    pub retained_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRunHealth>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let snapshot = state.supervisor.status();
    let active_run = snapshot.active.map(|a| a.run_id);

    Json(HealthResponse {
        status: if active_run.is_some() { "busy" } else { "ok" },
        module: "hwreg-upload",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        active_run,
        retained_failed: snapshot.retained_failed,
        last_run: snapshot.last_outcome.map(LastRunHealth::from),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
