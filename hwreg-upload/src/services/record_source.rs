//! Record source adapter
//!
//! Turns whatever the caller supplied (an input file, nothing at all, or the
//! failed records of a previous run) into an ordered, duplicate-free list of
//! [`IdentityRecord`]s. Validation of individual records is left to the
//! engine: a bad row becomes an invalid record, not a source error.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{IdentityRecord, RunDefaults};
use crate::services::field_aliases::{find_column, lookup_value, RecordField};
use crate::services::local_identity::LocalIdentitySource;

/// Header written to generated identity files
pub const GENERATED_HEADER: &str = "Device Serial Number,Windows Product ID,Hardware Hash";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unreadable input file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Local identity unavailable: {0}")]
    LocalIdentity(String),
}

/// What the caller supplied for a run
#[derive(Debug, Clone)]
pub enum RecordInput {
    /// A file path; `None`, a missing path or a directory means "no file"
    File(Option<PathBuf>),
    /// Explicit records, used for retry runs
    Records(Vec<IdentityRecord>),
}

/// Records ready for the engine
#[derive(Debug, Clone)]
pub struct ResolvedRecords {
    pub records: Vec<IdentityRecord>,
    /// Set when the records came from the local machine and were written out
    pub generated_file: Option<PathBuf>,
}

/// Input file flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    Tabular,
    Structured,
}

pub struct RecordSource {
    identity: Arc<dyn LocalIdentitySource>,
    work_folder: PathBuf,
}

impl RecordSource {
    pub fn new(identity: Arc<dyn LocalIdentitySource>, work_folder: PathBuf) -> Self {
        Self {
            identity,
            work_folder,
        }
    }

    pub fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    /// Produce the candidate records for one run
    pub async fn resolve(
        &self,
        input: RecordInput,
        fallback_serial: Option<&str>,
        defaults: &RunDefaults,
    ) -> Result<ResolvedRecords, SourceError> {
        match input {
            RecordInput::Records(records) => {
                debug!(count = records.len(), "Using explicit record list");
                Ok(ResolvedRecords {
                    records: dedupe_by_serial(records),
                    generated_file: None,
                })
            }
            RecordInput::File(path) => match path.filter(|p| is_usable_file(p)) {
                Some(path) => {
                    let records = read_records_file(&path).await?;
                    let records = records
                        .into_iter()
                        .map(|r| r.with_defaults(defaults))
                        .collect();
                    let records = dedupe_by_serial(records);
                    info!(path = %path.display(), count = records.len(), "Loaded identity records");
                    Ok(ResolvedRecords {
                        records,
                        generated_file: None,
                    })
                }
                None => self.local_record(fallback_serial, defaults).await,
            },
        }
    }

    /// Collect the local machine identity and write it to a generated file
    async fn local_record(
        &self,
        fallback_serial: Option<&str>,
        defaults: &RunDefaults,
    ) -> Result<ResolvedRecords, SourceError> {
        let identity = self
            .identity
            .get_local_identity()
            .await
            .map_err(|e| SourceError::LocalIdentity(e.to_string()))?;

        let serial = identity
            .serial
            .filter(|s| !s.trim().is_empty())
            .or_else(|| fallback_serial.map(str::to_string))
            .unwrap_or_default();

        let record = IdentityRecord::new(serial, identity.fingerprint.unwrap_or_default())
            .with_product_key(identity.product_key)
            .with_defaults(defaults);

        let path = self.generated_path();
        write_generated_file(&path, &record).await?;
        info!(path = %path.display(), serial = %record.serial_number(), "Wrote local identity file");

        Ok(ResolvedRecords {
            records: vec![record],
            generated_file: Some(path),
        })
    }

    fn generated_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        self.work_folder.join(format!("hwreg_identity_{}.csv", stamp))
    }
}

fn is_usable_file(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_file()
}

/// Keep the first record per serial (case-insensitive); records without a
/// serial are all kept so each surfaces as a validation failure
pub fn dedupe_by_serial(records: Vec<IdentityRecord>) -> Vec<IdentityRecord> {
    let mut seen = HashSet::new();
    let before = records.len();
    let kept: Vec<IdentityRecord> = records
        .into_iter()
        .filter(|r| r.serial_number().is_empty() || seen.insert(r.serial_key()))
        .collect();

    if kept.len() < before {
        debug!(removed = before - kept.len(), "Dropped duplicate serials from input");
    }
    kept
}

/// Read and parse one input file
pub async fn read_records_file(path: &Path) -> Result<Vec<IdentityRecord>, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode_text(&bytes);

    let malformed = |reason: String| SourceError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    match detect_format(path, &text) {
        InputFormat::Structured => parse_structured(&text).map_err(malformed),
        InputFormat::Tabular => parse_tabular(&text).map_err(malformed),
    }
}

fn detect_format(path: &Path, text: &str) -> InputFormat {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") => InputFormat::Tabular,
        Some("json") => InputFormat::Structured,
        _ => match text.trim_start().chars().next() {
            Some('[') | Some('{') => InputFormat::Structured,
            _ => InputFormat::Tabular,
        },
    }
}

/// Decode file bytes, honoring UTF-8 and UTF-16LE byte order marks
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse a JSON array of objects (a single object is accepted too)
pub fn parse_structured(text: &str) -> Result<Vec<IdentityRecord>, String> {
    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| format!("invalid JSON: {}", e))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => return Err("expected an array of device objects".to_string()),
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.as_object() {
            Some(object) => record_from_lookup(|field| lookup_value(object, field)),
            None => {
                warn!(index, "Input element is not an object");
                IdentityRecord::new("", "")
            }
        })
        .collect())
}

/// Parse CSV text with a header row
pub fn parse_tabular(text: &str) -> Result<Vec<IdentityRecord>, String> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().ok_or("file is empty")?;
    let headers = parse_csv_line(header_line);

    let serial_col = find_column(&headers, RecordField::SerialNumber);
    let fingerprint_col = find_column(&headers, RecordField::HardwareFingerprint);
    if serial_col.is_none() && fingerprint_col.is_none() {
        return Err("header row has neither a serial number nor a hardware hash column".into());
    }

    let columns: Vec<(RecordField, Option<usize>)> = RecordField::ALL
        .iter()
        .map(|field| (*field, find_column(&headers, *field)))
        .collect();

    Ok(lines
        .map(|line| {
            let values = parse_csv_line(line);
            record_from_lookup(|field| {
                columns
                    .iter()
                    .find(|(f, _)| *f == field)
                    .and_then(|(_, col)| *col)
                    .and_then(|col| values.get(col))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        })
        .collect())
}

fn record_from_lookup(get: impl Fn(RecordField) -> Option<String>) -> IdentityRecord {
    IdentityRecord::new(
        get(RecordField::SerialNumber).unwrap_or_default(),
        get(RecordField::HardwareFingerprint).unwrap_or_default(),
    )
    .with_product_key(get(RecordField::ProductKey))
    .with_group_tag(get(RecordField::GroupTag))
    .with_assigned_user(get(RecordField::AssignedUser))
    .with_assigned_computer_name(get(RecordField::AssignedComputerName))
}

/// Split one CSV line, honoring double quotes and `""` escapes
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == ',' {
            result.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    result.push(current);
    result
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

async fn write_generated_file(path: &Path, record: &IdentityRecord) -> Result<(), SourceError> {
    let io_err = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let content = format!(
        "{}\n{},{},{}\n",
        GENERATED_HEADER,
        csv_field(record.serial_number()),
        csv_field(record.product_key().unwrap_or_default()),
        csv_field(record.hardware_fingerprint()),
    );

    tokio::fs::write(path, content).await.map_err(io_err)
}
