//! Offline license issuance for usblock.
//!
//! Runs on the authority's machine, never on a protected host: it is the
//! only place the private key is read.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use usblock_crypto::{KeyPair, PublicKey};
use usblock_license::{LicenseIssuer, LicenseRecord};

/// Date-time layouts accepted without an explicit offset; all are UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpirationParseError {
    #[error("invalid expiration date `{0}`: use YYYY-MM-DD or YYYY-MM-DD hh:mm:ss")]
    Invalid(String),
}

/// Parses an expiration given on the command line.
///
/// Accepts `YYYY-MM-DD` (midnight), `YYYY-MM-DD hh:mm:ss` and
/// `YYYY-MM-DDThh:mm:ss`, each optionally followed by `Z`, all read as UTC.
/// RFC 3339 values with an explicit offset are converted to UTC.
pub fn parse_expiration(input: &str) -> Result<DateTime<Utc>, ExpirationParseError> {
    let s = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    for format in NAIVE_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| ExpirationParseError::Invalid(input.to_string()))
}

/// Everything needed to issue one license file.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub private_key: PathBuf,
    pub product: String,
    pub device_serial: String,
    pub expires: DateTime<Utc>,
    pub output: PathBuf,
}

/// Signs a license for the request and writes it to `request.output`.
pub fn run_issue(request: &IssueRequest) -> Result<LicenseRecord> {
    let pem = fs::read_to_string(&request.private_key).with_context(|| {
        format!("private key not found: {}", request.private_key.display())
    })?;
    let issuer = LicenseIssuer::from_pem(&pem).with_context(|| {
        format!("{} is not an Ed25519 private key", request.private_key.display())
    })?;

    if request.expires < Utc::now() {
        warn!(expires = %request.expires, "expiration is in the past; license is already expired");
    }

    issuer
        .issue_to_file(
            &request.product,
            &request.device_serial,
            request.expires,
            &request.output,
        )
        .context("failed to issue license")
}

/// Generates an authority key pair and writes it as PEM files.
///
/// Existing files are left alone unless `force` is set.
pub fn run_keygen(private_out: &Path, public_out: &Path, force: bool) -> Result<PublicKey> {
    if !force {
        for path in [private_out, public_out] {
            if path.exists() {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
        }
    }

    let keys = KeyPair::generate();
    let private_pem = keys.private_key.to_pem().context("failed to encode private key")?;
    let public_pem = keys.public_key.to_pem().context("failed to encode public key")?;

    write_private(private_out, &private_pem)
        .with_context(|| format!("failed to write {}", private_out.display()))?;
    fs::write(public_out, public_pem)
        .with_context(|| format!("failed to write {}", public_out.display()))?;

    info!(
        private_key = %private_out.display(),
        public_key = %public_out.display(),
        "key pair generated"
    );
    Ok(keys.public_key)
}

/// Writes the private key readable by the owner only, tightening the mode
/// of an existing file before any key bytes land in it.
fn write_private(path: &Path, pem: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(pem.as_bytes())
}
