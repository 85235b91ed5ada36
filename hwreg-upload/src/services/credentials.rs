//! Credential acquisition
//!
//! The engine never stores credentials. It asks a [`CredentialProvider`] for a
//! valid bearer token at the start of a run and before each remote call.

use async_trait::async_trait;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Not connected: no access token available")]
    NotConnected,

    #[error("Credential provider error: {0}")]
    Provider(String),
}

/// Bearer token for the registry
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_valid_credential(&self) -> Result<Credential, CredentialError>;
}

/// Holds one token in memory; absent token means "not connected"
#[derive(Default)]
pub struct StaticCredentialProvider {
    token: RwLock<Option<String>>,
}

impl StaticCredentialProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    pub fn clear(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn is_connected(&self) -> bool {
        self.token
            .read()
            .map(|t| t.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_valid_credential(&self) -> Result<Credential, CredentialError> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(Credential::new)
            .ok_or(CredentialError::NotConnected)
    }
}
