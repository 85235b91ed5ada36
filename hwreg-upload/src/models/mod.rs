//! Data models for hwreg-upload

pub mod duplicate_check;
pub mod identity_record;
pub mod parameters;
pub mod result_row;
pub mod run_summary;
pub mod upload_outcome;

pub use duplicate_check::DuplicateCheckResult;
pub use identity_record::{serial_key, serials_match, IdentityRecord, ValidationError};
pub use parameters::{EngineSettings, PollSettings, RunDefaults, ScanSettings};
pub use result_row::{RecordOutcome, ResultRow, RowResult, RowStatus};
pub use run_summary::RunSummary;
pub use upload_outcome::UploadOutcome;
