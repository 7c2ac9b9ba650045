//! Per-volume license check: resolve the serial, load the license, verify
//! it, and match it to the device it was found on.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;
use usblock_crypto::PublicKey;
use usblock_license::{decode, matches_device, DecodeError, LicenseVerifier, VerificationOutcome};

use crate::device::{AttachEvent, SerialResolver, VolumeId};
use crate::error::DeviceResolutionError;

/// Largest license file the gate will read. Anything bigger is rejected
/// without being loaded.
pub const MAX_LICENSE_FILE_SIZE: u64 = 64 * 1024;

/// Why an attached volume was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The event carried no usable volume identifier.
    EmptyVolume,
    /// The physical serial could not be determined.
    SerialNotResolvable(DeviceResolutionError),
    /// No license file at the expected location.
    NoLicense(PathBuf),
    /// The license file exists but could not be read.
    Unreadable(String),
    /// The license text could not be decoded.
    Malformed(DecodeError),
    /// The verifier rejected the license.
    Verification(VerificationOutcome),
    /// The license is genuine but bound to another device.
    DeviceMismatch { licensed: String, attached: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyVolume => write!(f, "attach event without a volume identifier"),
            Self::SerialNotResolvable(e) => write!(f, "serial not resolvable: {e}"),
            Self::NoLicense(path) => write!(f, "no license present at {}", path.display()),
            Self::Unreadable(e) => write!(f, "license unreadable: {e}"),
            Self::Malformed(e) => write!(f, "{e}"),
            Self::Verification(outcome) => write!(f, "{outcome}"),
            Self::DeviceMismatch { licensed, .. } => {
                write!(f, "license bound to a different device ({licensed})")
            }
        }
    }
}

/// Final result of checking one attached volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The volume carries a valid license bound to its own disk.
    Accepted {
        serial: String,
        product: String,
        expires: String,
    },
    Rejected(RejectReason),
}

impl CheckOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The rejection reason, if any.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { product, expires, .. } => {
                write!(f, "license accepted for {product} (expires {expires})")
            }
            Self::Rejected(reason) => write!(f, "license rejected: {reason}"),
        }
    }
}

/// Verifies licenses found on attached volumes.
///
/// Holds only read-only state and is shared between concurrent checks.
pub struct LicenseGate {
    verifier: LicenseVerifier,
    resolver: Arc<dyn SerialResolver>,
    license_file_name: String,
}

impl LicenseGate {
    pub fn new(
        public_key: PublicKey,
        resolver: Arc<dyn SerialResolver>,
        license_file_name: impl Into<String>,
    ) -> Self {
        Self {
            verifier: LicenseVerifier::new(public_key),
            resolver,
            license_file_name: license_file_name.into(),
        }
    }

    pub fn license_file_name(&self) -> &str {
        &self.license_file_name
    }

    /// Runs the full check for one event at instant `now`, without any
    /// settle delay.
    pub async fn check(&self, event: &AttachEvent, now: DateTime<Utc>) -> CheckOutcome {
        if event.volume.is_empty() {
            return CheckOutcome::Rejected(RejectReason::EmptyVolume);
        }
        match self.resolve(&event.volume).await {
            Ok(serial) => self.inspect(&event.volume, &serial, now).await,
            Err(reason) => CheckOutcome::Rejected(reason),
        }
    }

    /// Looks up the physical serial behind `volume` on the blocking pool.
    pub async fn resolve(&self, volume: &VolumeId) -> Result<String, RejectReason> {
        let resolver = Arc::clone(&self.resolver);
        let lookup = volume.clone();
        let result = tokio::task::spawn_blocking(move || resolver.resolve_serial(&lookup))
            .await
            .unwrap_or_else(|e| Err(DeviceResolutionError::Io(format!("resolver task failed: {e}"))));

        match result {
            Ok(serial) if serial.trim().is_empty() => Err(RejectReason::SerialNotResolvable(
                DeviceResolutionError::NoSerial(volume.to_string()),
            )),
            Ok(serial) => Ok(serial),
            Err(e) => Err(RejectReason::SerialNotResolvable(e)),
        }
    }

    /// Loads the license from `volume` and checks it against `serial`.
    pub async fn inspect(&self, volume: &VolumeId, serial: &str, now: DateTime<Utc>) -> CheckOutcome {
        let path = volume.license_path(&self.license_file_name);
        let bytes = match read_bounded(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return CheckOutcome::Rejected(RejectReason::NoLicense(path));
            }
            Err(e) => {
                return CheckOutcome::Rejected(RejectReason::Unreadable(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        };
        if bytes.len() as u64 > MAX_LICENSE_FILE_SIZE {
            return CheckOutcome::Rejected(RejectReason::Malformed(DecodeError::Malformed(format!(
                "license file exceeds {MAX_LICENSE_FILE_SIZE} bytes"
            ))));
        }
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                return CheckOutcome::Rejected(RejectReason::Malformed(DecodeError::Malformed(
                    format!("license file is not valid UTF-8: {e}"),
                )));
            }
        };

        let record = match decode(&text) {
            Ok(record) => record,
            Err(e) => return CheckOutcome::Rejected(RejectReason::Malformed(e)),
        };
        debug!(fingerprint = %record.fingerprint(), path = %path.display(), "license loaded");

        let outcome = self.verifier.verify(&record, now);
        if !outcome.is_valid() {
            return CheckOutcome::Rejected(RejectReason::Verification(outcome));
        }

        if !matches_device(&record, serial) {
            return CheckOutcome::Rejected(RejectReason::DeviceMismatch {
                licensed: record.device_serial,
                attached: serial.to_string(),
            });
        }

        CheckOutcome::Accepted {
            serial: serial.to_string(),
            product: record.product,
            expires: record.expires,
        }
    }
}

/// Reads at most one byte past [`MAX_LICENSE_FILE_SIZE`], so an oversized
/// file is detectable without loading it.
async fn read_bounded(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut bytes = Vec::new();
    file.take(MAX_LICENSE_FILE_SIZE + 1).read_to_end(&mut bytes).await?;
    Ok(bytes)
}
