//! Bootstrap configuration loading and folder resolution
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`HWREG_CONFIG`, `HWREG_WORK_FOLDER`)
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! Settings that cannot be read from any source fall back to the compiled
//! defaults below, so an empty or missing TOML file is a valid configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_ENV_VAR: &str = "HWREG_CONFIG";

/// Environment variable overriding the work folder
pub const WORK_FOLDER_ENV_VAR: &str = "HWREG_WORK_FOLDER";

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup. The process must restart to pick up changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP control port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Folder for generated identity files
    #[serde(default)]
    pub work_folder: Option<PathBuf>,

    /// Bearer token for the registry (kept in memory only)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remote registry endpoint settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Upload engine tuning
    #[serde(default)]
    pub upload: UploadConfig,

    /// Local hardware identity collection
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info" or "hwreg_upload=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Remote registry endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the device-management API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Maximum requests per second issued by the client
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Transport timeout per request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Upload engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Seconds between status polls of one submitted record
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Status polls per record before it is reported as queued
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Page size for the fallback duplicate scan
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,

    /// Page cap for the fallback duplicate scan
    #[serde(default = "default_scan_max_pages")]
    pub scan_max_pages: usize,

    /// Run-level default group tag
    #[serde(default)]
    pub group_tag: Option<String>,

    /// Run-level default assigned user principal name
    #[serde(default)]
    pub assigned_user: Option<String>,
}

/// Local hardware identity collection
///
/// The command must print one JSON object with the keys
/// `serialNumber`, `productKey` and `hardwareHash` on stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Program to run
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_port() -> u16 {
    5790
}

fn default_log_level() -> String {
    "hwreg_upload=info,tower_http=info".to_string()
}

fn default_base_url() -> String {
    "https://graph.microsoft.com/beta".to_string()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_poll_attempts() -> u32 {
    20
}

fn default_scan_page_size() -> usize {
    100
}

fn default_scan_max_pages() -> usize {
    25
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            work_folder: None,
            access_token: None,
            logging: LoggingConfig::default(),
            registry: RegistryConfig::default(),
            upload: UploadConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            requests_per_second: default_requests_per_second(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            scan_page_size: default_scan_page_size(),
            scan_max_pages: default_scan_max_pages(),
            group_tag: None,
            assigned_user: None,
        }
    }
}

/// Resolve the TOML config file location
///
/// Priority: CLI argument → `HWREG_CONFIG` → `<config_dir>/hwreg/hwreg.toml`.
/// Returns `None` when no source names a file and the default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Platform config file location (`~/.config/hwreg/hwreg.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hwreg").join("hwreg.toml"))
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load the resolved config file, or compiled defaults when none is found
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => load_toml_config(&path),
        None => {
            debug!("No configuration file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write config to disk atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Resolve the work folder for generated identity files
///
/// Priority: CLI argument → `HWREG_WORK_FOLDER` → TOML → OS default.
pub fn resolve_work_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(WORK_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.work_folder {
        return path.clone();
    }

    default_work_folder()
}

/// OS-dependent default work folder
fn default_work_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hwreg"))
        .unwrap_or_else(|| PathBuf::from("./hwreg_data"))
}
