//! Result of checking one serial against the registry

use serde::{Deserialize, Serialize};

/// Where a duplicate check got its answer
pub const SOURCE_INDEXED: &str = "indexed";
pub const SOURCE_SCAN: &str = "scan";
pub const SOURCE_UNAVAILABLE: &str = "unavailable";

/// Outcome of one duplicate check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheckResult {
    pub exists: bool,
    /// True when the record must not be submitted
    pub blocking: bool,
    pub source: String,
    pub serial: String,
}

impl DuplicateCheckResult {
    pub fn found(serial: &str, source: &str) -> Self {
        Self {
            exists: true,
            blocking: true,
            source: source.to_string(),
            serial: serial.to_string(),
        }
    }

    pub fn not_found(serial: &str, source: &str) -> Self {
        Self {
            exists: false,
            blocking: false,
            source: source.to_string(),
            serial: serial.to_string(),
        }
    }
}
