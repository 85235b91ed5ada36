//! Configuration resolution for hwreg-upload
//!
//! Access token priority: `HWREG_ACCESS_TOKEN` → TOML `access_token`.
//! No token leaves the engine "not connected"; runs then abort before any
//! remote call.

use hwreg_common::config::TomlConfig;
use tracing::{info, warn};

/// Environment variable holding the registry bearer token
pub const ACCESS_TOKEN_ENV_VAR: &str = "HWREG_ACCESS_TOKEN";

/// Resolve the access token from environment and TOML
pub fn resolve_access_token(toml_config: &TomlConfig) -> Option<String> {
    let env_token = std::env::var(ACCESS_TOKEN_ENV_VAR)
        .ok()
        .filter(|t| is_valid_token(t));
    let toml_token = toml_config
        .access_token
        .clone()
        .filter(|t| is_valid_token(t));

    if env_token.is_some() && toml_token.is_some() {
        warn!("Access token found in multiple sources: environment, TOML. Using environment (highest priority).");
    }

    if let Some(token) = env_token {
        info!("Access token loaded from environment variable");
        return Some(token.trim().to_string());
    }

    if let Some(token) = toml_token {
        info!("Access token loaded from TOML config");
        return Some(token.trim().to_string());
    }

    warn!(
        "No access token configured; set {} or access_token in the TOML config",
        ACCESS_TOKEN_ENV_VAR
    );
    None
}

/// Non-empty, non-whitespace
pub fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}
