//! Device identity record
//!
//! One device's registration data. Records are built by the record source
//! and are not mutated afterwards; the builder-style `with_*` methods consume
//! the record and are only used during construction.

use serde::Serialize;
use thiserror::Error;

use crate::models::RunDefaults;

/// Per-record validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing serial number")]
    MissingSerial,

    #[error("Missing hardware hash for serial {0}")]
    MissingFingerprint(String),
}

/// Registration data for one physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_key: Option<String>,
    hardware_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_user_principal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_computer_name: Option<String>,
}

/// Trim a value and drop it when nothing is left
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl IdentityRecord {
    /// Create a record from its required fields (trimmed, case preserved)
    pub fn new(serial_number: impl Into<String>, hardware_fingerprint: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into().trim().to_string(),
            product_key: None,
            hardware_fingerprint: hardware_fingerprint.into().trim().to_string(),
            group_tag: None,
            assigned_user_principal_name: None,
            assigned_computer_name: None,
        }
    }

    pub fn with_product_key(mut self, product_key: Option<String>) -> Self {
        self.product_key = non_empty(product_key);
        self
    }

    pub fn with_group_tag(mut self, group_tag: Option<String>) -> Self {
        self.group_tag = non_empty(group_tag);
        self
    }

    pub fn with_assigned_user(mut self, upn: Option<String>) -> Self {
        self.assigned_user_principal_name = non_empty(upn);
        self
    }

    pub fn with_assigned_computer_name(mut self, name: Option<String>) -> Self {
        self.assigned_computer_name = non_empty(name);
        self
    }

    /// Fill absent optional attributes from run-level defaults
    pub fn with_defaults(mut self, defaults: &RunDefaults) -> Self {
        if self.group_tag.is_none() {
            self.group_tag = non_empty(defaults.group_tag.clone());
        }
        if self.assigned_user_principal_name.is_none() {
            self.assigned_user_principal_name = non_empty(defaults.assigned_user.clone());
        }
        if self.assigned_computer_name.is_none() {
            self.assigned_computer_name = non_empty(defaults.assigned_computer_name.clone());
        }
        self
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn product_key(&self) -> Option<&str> {
        self.product_key.as_deref()
    }

    pub fn hardware_fingerprint(&self) -> &str {
        &self.hardware_fingerprint
    }

    pub fn group_tag(&self) -> Option<&str> {
        self.group_tag.as_deref()
    }

    pub fn assigned_user_principal_name(&self) -> Option<&str> {
        self.assigned_user_principal_name.as_deref()
    }

    pub fn assigned_computer_name(&self) -> Option<&str> {
        self.assigned_computer_name.as_deref()
    }

    /// Case-insensitive comparison key for the serial number
    pub fn serial_key(&self) -> String {
        serial_key(&self.serial_number)
    }

    /// Check that both required fields are present
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.serial_number.is_empty() {
            return Err(ValidationError::MissingSerial);
        }
        if self.hardware_fingerprint.is_empty() {
            return Err(ValidationError::MissingFingerprint(self.serial_number.clone()));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Normalize a serial for comparison (trimmed, lowercase)
pub fn serial_key(serial: &str) -> String {
    serial.trim().to_lowercase()
}

/// True when two serials name the same device
pub fn serials_match(a: &str, b: &str) -> bool {
    !a.trim().is_empty() && serial_key(a) == serial_key(b)
}
