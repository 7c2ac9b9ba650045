//! License verification against a public key and a point in time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use usblock_crypto::PublicKey;

use crate::record::LicenseRecord;

/// Result of checking a license record.
///
/// Every variant other than `Valid` is a rejection reported to the caller,
/// never raised as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Signature checks out and the license has not expired.
    Valid,
    /// The expiry instant has passed.
    Expired,
    /// The signature does not match the record under this public key.
    SignatureInvalid,
    /// The expiry could not be parsed.
    Malformed,
}

impl VerificationOutcome {
    /// Returns true only for `Valid`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "license valid",
            Self::Expired => "license expired",
            Self::SignatureInvalid => "license signature invalid",
            Self::Malformed => "license malformed",
        })
    }
}

/// Checks `record` at instant `now`.
///
/// Order is fixed: expiry parse, expiry comparison, then signature. A
/// license is still valid at exactly its expiry instant. Device binding is
/// not checked here; see [`matches_device`].
pub fn verify(record: &LicenseRecord, public_key: &PublicKey, now: DateTime<Utc>) -> VerificationOutcome {
    let Some(expires_at) = record.expires_at() else {
        debug!(expires = %record.expires, "unparsable expiry");
        return VerificationOutcome::Malformed;
    };

    if now > expires_at {
        debug!(%expires_at, %now, "license expired");
        return VerificationOutcome::Expired;
    }

    if !public_key.verify(&record.canonical_message(), &record.signature) {
        return VerificationOutcome::SignatureInvalid;
    }

    VerificationOutcome::Valid
}

/// Compares the licensed serial with the serial of the attached device.
///
/// Case-insensitive; surrounding whitespace is ignored since firmware often
/// pads serials with spaces.
#[must_use]
pub fn matches_device(record: &LicenseRecord, attached_serial: &str) -> bool {
    normalize_serial(&record.device_serial) == normalize_serial(attached_serial)
}

fn normalize_serial(serial: &str) -> String {
    serial.trim().to_lowercase()
}

/// Holds the process-wide public key and verifies records with it.
#[derive(Debug, Clone)]
pub struct LicenseVerifier {
    public_key: PublicKey,
}

impl LicenseVerifier {
    /// Creates a verifier for the given public key.
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    /// Returns the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Verifies `record` at `now`.
    pub fn verify(&self, record: &LicenseRecord, now: DateTime<Utc>) -> VerificationOutcome {
        verify(record, &self.public_key, now)
    }

    /// Verifies `record` against the current wall-clock time.
    pub fn verify_now(&self, record: &LicenseRecord) -> VerificationOutcome {
        self.verify(record, Utc::now())
    }
}
