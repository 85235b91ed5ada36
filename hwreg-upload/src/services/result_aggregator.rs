//! Result aggregation
//!
//! Pure functions from the rows of one run to its summary, its retry set and
//! the final [`UploadOutcome`].

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{IdentityRecord, RecordOutcome, ResultRow, RowResult, RunSummary, UploadOutcome};

/// Tally rows; each row counts in exactly one bucket
pub fn summarize(rows: &[ResultRow]) -> RunSummary {
    let mut summary = RunSummary {
        total: rows.len(),
        ..Default::default()
    };

    for row in rows {
        if row.is_duplicate() {
            summary.duplicate += 1;
            continue;
        }
        match row.result {
            RowResult::Success => summary.success += 1,
            RowResult::Failed => summary.failed += 1,
            RowResult::Accepted => summary.pending += 1,
            RowResult::Skipped => summary.duplicate += 1,
        }
    }

    summary
}

/// Records to replay in the next retry run: failed, never duplicates
pub fn retry_candidates(outcomes: &[RecordOutcome]) -> Vec<IdentityRecord> {
    outcomes
        .iter()
        .filter(|o| o.row.result == RowResult::Failed && !o.row.is_duplicate())
        .map(|o| o.record.clone())
        .collect()
}

pub fn is_run_successful(summary: &RunSummary) -> bool {
    summary.is_successful()
}

/// Assemble the outcome of a run that processed its records
pub fn build_outcome(
    run_id: Uuid,
    retry: bool,
    started_at: DateTime<Utc>,
    outcomes: &[RecordOutcome],
    uploaded_count: usize,
    generated_file: Option<PathBuf>,
) -> UploadOutcome {
    let results: Vec<ResultRow> = outcomes.iter().map(|o| o.row.clone()).collect();
    let summary = summarize(&results);

    UploadOutcome {
        run_id,
        retry,
        success: is_run_successful(&summary),
        uploaded_count,
        blocked: false,
        summary,
        results,
        failed_records: retry_candidates(outcomes),
        error: None,
        generated_file,
        started_at,
        ended_at: Utc::now(),
    }
}
