//! Alternate key names for identity record fields
//!
//! Input files come from several export tools, each spelling the same column
//! differently. Every logical field has an ordered alias list; the first alias
//! present in a header row or JSON object wins.

/// Logical identity record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    SerialNumber,
    ProductKey,
    HardwareFingerprint,
    GroupTag,
    AssignedUser,
    AssignedComputerName,
}

const SERIAL_ALIASES: &[&str] = &[
    "serialNumber",
    "Device Serial Number",
    "Serial Number",
    "SerialNumber",
    "serial",
];

const PRODUCT_KEY_ALIASES: &[&str] = &[
    "productKey",
    "Windows Product ID",
    "Product ID",
    "ProductId",
];

const FINGERPRINT_ALIASES: &[&str] = &[
    "hardwareIdentifier",
    "Hardware Hash",
    "hardwareHash",
    "hardwareFingerprint",
];

const GROUP_TAG_ALIASES: &[&str] = &["groupTag", "Group Tag", "OrderID"];

const ASSIGNED_USER_ALIASES: &[&str] = &["assignedUserPrincipalName", "Assigned User"];

const COMPUTER_NAME_ALIASES: &[&str] = &["assignedComputerName", "Assigned Computer Name"];

impl RecordField {
    pub const ALL: [RecordField; 6] = [
        RecordField::SerialNumber,
        RecordField::ProductKey,
        RecordField::HardwareFingerprint,
        RecordField::GroupTag,
        RecordField::AssignedUser,
        RecordField::AssignedComputerName,
    ];

    /// Accepted key names, preferred first
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            RecordField::SerialNumber => SERIAL_ALIASES,
            RecordField::ProductKey => PRODUCT_KEY_ALIASES,
            RecordField::HardwareFingerprint => FINGERPRINT_ALIASES,
            RecordField::GroupTag => GROUP_TAG_ALIASES,
            RecordField::AssignedUser => ASSIGNED_USER_ALIASES,
            RecordField::AssignedComputerName => COMPUTER_NAME_ALIASES,
        }
    }
}

/// Fold a key for comparison: lowercase, without spaces, `_` or `-`
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Index of the column holding `field`, honoring alias order
pub fn find_column(headers: &[String], field: RecordField) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_key(h)).collect();
    field.aliases().iter().find_map(|alias| {
        let wanted = normalize_key(alias);
        normalized.iter().position(|h| *h == wanted)
    })
}

/// Value of `field` in a JSON object, honoring alias order
///
/// Numbers are accepted and rendered as text; null and blank strings count
/// as absent so a later alias can still supply the value.
pub fn lookup_value(
    object: &serde_json::Map<String, serde_json::Value>,
    field: RecordField,
) -> Option<String> {
    field.aliases().iter().find_map(|alias| {
        let wanted = normalize_key(alias);
        object
            .iter()
            .filter(|(key, _)| normalize_key(key) == wanted)
            .find_map(|(_, value)| value_as_text(value))
    })
}

fn value_as_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
