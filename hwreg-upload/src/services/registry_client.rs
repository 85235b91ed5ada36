//! Remote device registry client
//!
//! [`DeviceRegistry`] is the seam the engine talks to. [`GraphRegistryClient`]
//! implements it against a Graph-style device-management REST API: JSON
//! bodies over HTTPS, bearer authentication, `@odata.nextLink` paging.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::IdentityRecord;
use crate::services::credentials::{CredentialError, CredentialProvider};

const USER_AGENT: &str = concat!("hwreg-upload/", env!("CARGO_PKG_VERSION"));
const DEVICES_PATH: &str = "deviceManagement/windowsAutopilotDeviceIdentities";
const IMPORTS_PATH: &str = "deviceManagement/importedWindowsAutopilotDeviceIdentities";
const IMPORT_ODATA_TYPE: &str = "#microsoft.graph.importedWindowsAutopilotDeviceIdentity";

/// Registry client errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error {status}: {}", remote_text(.code, .message))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

fn remote_text(code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) if !code.is_empty() => format!("{}: {}", code, message),
        _ => message.to_string(),
    }
}

impl RegistryError {
    /// Human-readable remote error text for result rows
    pub fn remote_message(&self) -> String {
        match self {
            RegistryError::Api { code, message, .. } => remote_text(code, message),
            other => other.to_string(),
        }
    }

    /// Server reports the device as already assigned/registered
    pub fn is_already_assigned(&self) -> bool {
        match self {
            RegistryError::Api { code, message, .. } => {
                mentions_already_assigned(code.as_deref().unwrap_or_default())
                    || mentions_already_assigned(message)
            }
            _ => false,
        }
    }
}

/// True when text says "already assigned" (spaced or camel-cased)
pub fn mentions_already_assigned(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("already assigned") || lower.contains("alreadyassigned")
}

/// A device already present in the registry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevice {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub serial_number: String,
}

/// One page of the raw device listing
#[derive(Debug, Clone, Default)]
pub struct DevicePage {
    pub devices: Vec<RegisteredDevice>,
    /// Opaque continuation; `None` on the last page
    pub next_link: Option<String>,
}

/// Receipt for an accepted create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTicket {
    pub import_id: Option<String>,
}

/// Processing state of one import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStatus {
    pub status: String,
    pub error_name: Option<String>,
    pub error_code: Option<String>,
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Indexed equality lookup, at most one result
    async fn find_by_serial(&self, serial: &str) -> Result<Vec<RegisteredDevice>, RegistryError>;

    /// Raw listing used by the fallback scan
    async fn list_page(
        &self,
        page_size: usize,
        next_link: Option<&str>,
    ) -> Result<DevicePage, RegistryError>;

    async fn create_record(&self, record: &IdentityRecord) -> Result<ImportTicket, RegistryError>;

    async fn get_import_status(&self, import_id: &str) -> Result<ImportStatus, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    value: Vec<RegisteredDevice>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportedIdentity {
    #[serde(default)]
    state: Option<ImportState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportState {
    #[serde(default)]
    device_import_status: Option<String>,
    #[serde(default)]
    device_error_code: Option<i64>,
    #[serde(default)]
    device_error_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Graph-style registry client
pub struct GraphRegistryClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GraphRegistryClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            rate_limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Throttle, attach the bearer token and send
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RegistryError> {
        let credential = self.credentials.get_valid_credential().await?;
        self.rate_limiter.until_ready().await;

        let response = request
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RegistryError> {
        response
            .json()
            .await
            .map_err(|e| RegistryError::Parse(e.to_string()))
    }
}

/// Map a non-success response to an error, extracting the remote error text
pub fn error_from_response(status: StatusCode, body: &str) -> RegistryError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => {
            let text = body.trim();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.chars().take(500).collect()
            };
            (None, message)
        }
    };

    if status == StatusCode::UNAUTHORIZED {
        return RegistryError::Unauthorized(remote_text(&code, &message));
    }

    RegistryError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

/// Escape a value for an OData string literal
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl DeviceRegistry for GraphRegistryClient {
    async fn find_by_serial(&self, serial: &str) -> Result<Vec<RegisteredDevice>, RegistryError> {
        let filter = format!("serialNumber eq '{}'", odata_literal(serial.trim()));
        debug!(serial = %serial, "Indexed registry lookup");

        let request = self
            .client
            .get(self.url(DEVICES_PATH))
            .query(&[("$filter", filter.as_str()), ("$top", "1")]);

        let list: ListResponse = Self::parse(self.send(request).await?).await?;
        Ok(list.value.into_iter().take(1).collect())
    }

    async fn list_page(
        &self,
        page_size: usize,
        next_link: Option<&str>,
    ) -> Result<DevicePage, RegistryError> {
        let request = match next_link {
            Some(link) => self.client.get(link),
            None => self
                .client
                .get(self.url(DEVICES_PATH))
                .query(&[("$top", page_size.to_string())]),
        };

        let list: ListResponse = Self::parse(self.send(request).await?).await?;
        Ok(DevicePage {
            devices: list.value,
            next_link: list.next_link.filter(|l| !l.is_empty()),
        })
    }

    async fn create_record(&self, record: &IdentityRecord) -> Result<ImportTicket, RegistryError> {
        let mut body = json!({
            "@odata.type": IMPORT_ODATA_TYPE,
            "serialNumber": record.serial_number(),
            "hardwareIdentifier": record.hardware_fingerprint(),
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(key) = record.product_key() {
                map.insert("productKey".into(), json!(key));
            }
            if let Some(tag) = record.group_tag() {
                map.insert("groupTag".into(), json!(tag));
            }
            if let Some(upn) = record.assigned_user_principal_name() {
                map.insert("assignedUserPrincipalName".into(), json!(upn));
            }
        }

        let request = self.client.post(self.url(IMPORTS_PATH)).json(&body);
        let created: CreateResponse = Self::parse(self.send(request).await?).await?;

        Ok(ImportTicket {
            import_id: created.id.filter(|id| !id.is_empty()),
        })
    }

    async fn get_import_status(&self, import_id: &str) -> Result<ImportStatus, RegistryError> {
        let request = self
            .client
            .get(format!("{}/{}", self.url(IMPORTS_PATH), import_id));

        let identity: ImportedIdentity = Self::parse(self.send(request).await?).await?;
        let state = identity.state.ok_or_else(|| {
            RegistryError::Parse("import response has no state".to_string())
        })?;

        Ok(ImportStatus {
            status: state.device_import_status.unwrap_or_default(),
            error_name: state.device_error_name.filter(|n| !n.is_empty()),
            error_code: state
                .device_error_code
                .filter(|c| *c != 0)
                .map(|c| c.to_string()),
        })
    }
}
