//! Final outcome of one upload run, as delivered to the caller

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{IdentityRecord, ResultRow, RunSummary};

/// Engine output contract
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub run_id: Uuid,
    /// True when the run replayed the previous run's failures
    pub retry: bool,
    pub success: bool,
    /// Records accepted by the create request
    pub uploaded_count: usize,
    /// Every candidate was already registered; nothing was submitted
    pub blocked: bool,
    pub summary: RunSummary,
    pub results: Vec<ResultRow>,
    pub failed_records: Vec<IdentityRecord>,
    pub error: Option<String>,
    /// Identity file written for a run without an input file
    pub generated_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl UploadOutcome {
    /// Run-level abort before any record was processed
    pub fn aborted(run_id: Uuid, retry: bool, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            run_id,
            retry,
            success: false,
            uploaded_count: 0,
            blocked: false,
            summary: RunSummary::default(),
            results: Vec::new(),
            failed_records: Vec::new(),
            error: Some(error),
            generated_file: None,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// All candidates already registered
    pub fn blocked(
        run_id: Uuid,
        retry: bool,
        started_at: DateTime<Utc>,
        serials: &[String],
        generated_file: Option<PathBuf>,
    ) -> Self {
        let error = if serials.len() == 1 {
            format!("Device {} is already registered", serials[0])
        } else {
            format!("All {} devices are already registered", serials.len())
        };

        Self {
            blocked: true,
            generated_file,
            ..Self::aborted(run_id, retry, started_at, error)
        }
    }

    /// True when the run stopped on a source or precondition error
    pub fn is_aborted(&self) -> bool {
        self.error.is_some() && !self.blocked
    }
}
