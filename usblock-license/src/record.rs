//! The license record, its canonical signed message, and its JSON form.
//!
//! On disk a license is a JSON object with four string fields:
//!
//! ```json
//! {
//!   "product": "Acme",
//!   "usbSerial": "SN-001",
//!   "expires": "2025-01-01T00:00:00Z",
//!   "signature": "<standard base64>"
//! }
//! ```
//!
//! The signature covers `product|usbSerial|expires` built from the decoded
//! field values, never from the raw file bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, LicenseResult};

/// Separator between fields of the canonical message.
pub const FIELD_DELIMITER: char = '|';

/// `strftime` pattern of the canonical expiry rendering.
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const FIELD_PRODUCT: &str = "product";
const FIELD_SERIAL: &str = "usbSerial";
const FIELD_EXPIRES: &str = "expires";
const FIELD_SIGNATURE: &str = "signature";

/// A signed license binding a product to one removable device until a
/// point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseRecord {
    /// Product identity chosen by the issuer.
    pub product: String,
    /// Physical serial of the authorized device.
    pub device_serial: String,
    /// Expiry exactly as persisted (canonically `YYYY-MM-DDThh:mm:ssZ`).
    pub expires: String,
    /// Raw signature over [`LicenseRecord::canonical_message`].
    pub signature: Vec<u8>,
}

impl LicenseRecord {
    /// Rebuilds the signed message from this record's fields.
    #[must_use]
    pub fn canonical_message(&self) -> Vec<u8> {
        canonical_message(&self.product, &self.device_serial, &self.expires)
    }

    /// Parses the expiry, or `None` if it is not a valid timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        parse_expires(&self.expires)
    }

    /// Short stable identifier for log lines: first 8 bytes of the
    /// SHA-256 of the signature, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(&self.signature);
        hex::encode(&hash[..8])
    }
}

/// Builds `product|device_serial|expires`.
///
/// Fields are concatenated as-is, so a delimiter inside `product` or
/// `device_serial` makes the message ambiguous. The issuer refuses such
/// fields.
#[must_use]
pub fn canonical_message(product: &str, device_serial: &str, expires: &str) -> Vec<u8> {
    format!("{product}{FIELD_DELIMITER}{device_serial}{FIELD_DELIMITER}{expires}").into_bytes()
}

/// Renders an instant in the canonical expiry format (UTC, whole seconds).
#[must_use]
pub fn format_expires(at: DateTime<Utc>) -> String {
    at.format(EXPIRES_FORMAT).to_string()
}

/// Parses an RFC 3339 timestamp and normalises it to UTC.
#[must_use]
pub fn parse_expires(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Serialize)]
struct LicenseFile<'a> {
    product: &'a str,
    #[serde(rename = "usbSerial")]
    device_serial: &'a str,
    expires: &'a str,
    signature: String,
}

/// Encodes a record as pretty-printed JSON with a fixed key order.
pub fn encode(record: &LicenseRecord) -> LicenseResult<String> {
    let file = LicenseFile {
        product: &record.product,
        device_serial: &record.device_serial,
        expires: &record.expires,
        signature: BASE64.encode(&record.signature),
    };
    let mut text = serde_json::to_string_pretty(&file)?;
    text.push('\n');
    Ok(text)
}

/// Decodes persisted license text. Unknown keys are ignored.
pub fn decode(text: &str) -> Result<LicenseRecord, DecodeError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Malformed(format!("not valid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(DecodeError::Malformed(format!(
            "expected a JSON object, found {}",
            kind(&value)
        )));
    };

    let product = string_field(&map, FIELD_PRODUCT)?;
    let device_serial = string_field(&map, FIELD_SERIAL)?;
    let expires = string_field(&map, FIELD_EXPIRES)?;
    let signature_b64 = string_field(&map, FIELD_SIGNATURE)?;

    let signature = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| DecodeError::Malformed(format!("signature is not valid base64: {e}")))?;

    Ok(LicenseRecord {
        product,
        device_serial,
        expires,
        signature,
    })
}

fn string_field(map: &Map<String, Value>, name: &'static str) -> Result<String, DecodeError> {
    match map.get(name) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::Malformed(format!(
            "field `{name}` must be a string, found {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
