//! Per-record results of one upload run

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::IdentityRecord;

/// Outcome class of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowResult {
    /// Registered
    Success,
    /// Rejected or invalid; eligible for retry
    Failed,
    /// Submitted but unresolved within the poll budget
    Accepted,
    /// Not submitted because the device is already registered
    Skipped,
}

/// Classification detail of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    Complete,
    Duplicate,
    UploadError,
    ImportError,
    Queued,
    Validation,
    Shutdown,
}

impl fmt::Display for RowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowResult::Success => "Success",
            RowResult::Failed => "Failed",
            RowResult::Accepted => "Accepted",
            RowResult::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowStatus::Complete => "Complete",
            RowStatus::Duplicate => "Duplicate",
            RowStatus::UploadError => "UploadError",
            RowStatus::ImportError => "ImportError",
            RowStatus::Queued => "Queued",
            RowStatus::Validation => "Validation",
            RowStatus::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

/// One row of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub serial: String,
    pub result: RowResult,
    pub status: RowStatus,
    pub reason: String,
}

impl ResultRow {
    fn new(serial: &str, result: RowResult, status: RowStatus, reason: impl Into<String>) -> Self {
        Self {
            serial: serial.to_string(),
            result,
            status,
            reason: reason.into(),
        }
    }

    pub fn complete(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Success, RowStatus::Complete, reason)
    }

    pub fn duplicate(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Skipped, RowStatus::Duplicate, reason)
    }

    pub fn upload_error(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Failed, RowStatus::UploadError, reason)
    }

    pub fn import_error(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Failed, RowStatus::ImportError, reason)
    }

    pub fn queued(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Accepted, RowStatus::Queued, reason)
    }

    pub fn validation(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Failed, RowStatus::Validation, reason)
    }

    /// Stopped before submission; retry-eligible
    pub fn shutdown_unsubmitted(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Failed, RowStatus::Shutdown, reason)
    }

    /// Stopped while polling a submitted record
    pub fn shutdown_submitted(serial: &str, reason: impl Into<String>) -> Self {
        Self::new(serial, RowResult::Accepted, RowStatus::Shutdown, reason)
    }

    pub fn is_duplicate(&self) -> bool {
        self.status == RowStatus::Duplicate || self.result == RowResult::Skipped
    }
}

/// A record paired with its row, kept until the run is aggregated
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record: IdentityRecord,
    pub row: ResultRow,
    /// Whether the create request was accepted by the registry
    pub submitted: bool,
}
