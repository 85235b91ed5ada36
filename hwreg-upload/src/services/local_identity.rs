//! Local hardware identity collection
//!
//! The engine treats the local fingerprint collector as an opaque source of
//! one `{serial, productKey, fingerprint}` tuple. The production source runs a
//! configured external command that prints a JSON object on stdout.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::services::field_aliases::{lookup_value, RecordField};

/// Identity of the machine the engine runs on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    pub serial: Option<String>,
    pub product_key: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Error)]
pub enum LocalIdentityError {
    #[error("No local identity collector configured")]
    NotConfigured,

    #[error("Failed to run {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unreadable collector output: {0}")]
    Output(String),
}

/// Source of the local machine identity
#[async_trait]
pub trait LocalIdentitySource: Send + Sync {
    async fn get_local_identity(&self) -> Result<LocalIdentity, LocalIdentityError>;
}

/// Runs an external collector and parses its JSON output
pub struct CommandIdentitySource {
    command: String,
    args: Vec<String>,
}

impl CommandIdentitySource {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl LocalIdentitySource for CommandIdentitySource {
    async fn get_local_identity(&self) -> Result<LocalIdentity, LocalIdentityError> {
        debug!(command = %self.command, "Collecting local hardware identity");

        let output = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LocalIdentityError::Spawn {
                command: self.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %self.command, status = %output.status, "Identity collector failed");
            return Err(LocalIdentityError::Failed {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }

        parse_identity_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse collector output: one JSON object, keys matched via the alias table
pub fn parse_identity_output(stdout: &str) -> Result<LocalIdentity, LocalIdentityError> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim().trim_start_matches('\u{feff}'))
        .map_err(|e| LocalIdentityError::Output(e.to_string()))?;

    // Some collectors wrap the object in a one-element array
    let object = match &value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Array(items) => items
            .first()
            .and_then(|v| v.as_object())
            .ok_or_else(|| LocalIdentityError::Output("empty array".to_string()))?,
        _ => return Err(LocalIdentityError::Output("expected a JSON object".to_string())),
    };

    Ok(LocalIdentity {
        serial: lookup_value(object, RecordField::SerialNumber),
        product_key: lookup_value(object, RecordField::ProductKey),
        fingerprint: lookup_value(object, RecordField::HardwareFingerprint),
    })
}

/// Used when no collector command is configured
pub struct UnavailableIdentitySource;

#[async_trait]
impl LocalIdentitySource for UnavailableIdentitySource {
    async fn get_local_identity(&self) -> Result<LocalIdentity, LocalIdentityError> {
        Err(LocalIdentityError::NotConfigured)
    }
}
