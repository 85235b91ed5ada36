//! Run parameters and engine tuning

use hwreg_common::config::UploadConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run-level defaults for optional record attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDefaults {
    #[serde(default)]
    pub group_tag: Option<String>,
    #[serde(default)]
    pub assigned_user: Option<String>,
    #[serde(default)]
    pub assigned_computer_name: Option<String>,
}

impl RunDefaults {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            group_tag: config.group_tag.clone(),
            assigned_user: config.assigned_user.clone(),
            assigned_computer_name: None,
        }
    }

    /// Values from `other` win where present
    pub fn overlay(&self, other: &RunDefaults) -> RunDefaults {
        RunDefaults {
            group_tag: other.group_tag.clone().or_else(|| self.group_tag.clone()),
            assigned_user: other.assigned_user.clone().or_else(|| self.assigned_user.clone()),
            assigned_computer_name: other
                .assigned_computer_name
                .clone()
                .or_else(|| self.assigned_computer_name.clone()),
        }
    }
}

/// Status polling budget per submitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_attempts: 20,
        }
    }
}

/// Bounds of the fallback duplicate scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 25,
        }
    }
}

/// Engine tuning resolved from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll: PollSettings,
    pub scan: ScanSettings,
}

impl From<&UploadConfig> for EngineSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            poll: PollSettings {
                interval: Duration::from_secs(config.poll_interval_secs),
                max_attempts: config.max_poll_attempts.max(1),
            },
            scan: ScanSettings {
                page_size: config.scan_page_size.max(1),
                max_pages: config.scan_max_pages,
            },
        }
    }
}
