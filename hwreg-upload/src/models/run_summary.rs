//! Per-run counts

use serde::{Deserialize, Serialize};

/// Counts derived from the rows of one run
///
/// Every row lands in exactly one of success/failed/duplicate/pending, so
/// the four buckets always sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub duplicate: usize,
    pub pending: usize,
}

impl RunSummary {
    /// No failures and at least one row that did not fail
    pub fn is_successful(&self) -> bool {
        self.failed == 0 && (self.success > 0 || self.pending > 0 || self.duplicate > 0)
    }
}
