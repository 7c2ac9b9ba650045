//! Offline license issuance.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::info;
use usblock_crypto::{PrivateKey, PublicKey};

use crate::error::{LicenseError, LicenseResult};
use crate::record::{canonical_message, encode, format_expires, LicenseRecord, FIELD_DELIMITER};

/// Signs licenses with the issuing authority's private key.
#[derive(Debug)]
pub struct LicenseIssuer {
    private_key: PrivateKey,
}

impl LicenseIssuer {
    /// Creates an issuer around an already-parsed private key.
    pub fn new(private_key: PrivateKey) -> Self {
        Self { private_key }
    }

    /// Creates an issuer from a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> LicenseResult<Self> {
        Ok(Self::new(PrivateKey::from_pem(pem)?))
    }

    /// Returns the public key that verifies this issuer's licenses.
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Issues a license for `product` bound to `device_serial`.
    ///
    /// `expires` is truncated to whole seconds. An instant in the past is
    /// accepted and produces a license that is already expired.
    pub fn issue(
        &self,
        product: &str,
        device_serial: &str,
        expires: DateTime<Utc>,
    ) -> LicenseResult<LicenseRecord> {
        issue(product, device_serial, expires, &self.private_key)
    }

    /// Issues a license and writes its encoded form to `destination`.
    pub fn issue_to_file(
        &self,
        product: &str,
        device_serial: &str,
        expires: DateTime<Utc>,
        destination: &Path,
    ) -> LicenseResult<LicenseRecord> {
        let record = self.issue(product, device_serial, expires)?;
        let text = encode(&record)?;
        fs::write(destination, text).map_err(|source| LicenseError::Write {
            path: destination.to_path_buf(),
            source,
        })?;

        info!(
            product = %record.product,
            serial = %record.device_serial,
            expires = %record.expires,
            fingerprint = %record.fingerprint(),
            "license written to {}",
            destination.display()
        );
        Ok(record)
    }
}

/// Builds, signs and assembles a license record.
pub fn issue(
    product: &str,
    device_serial: &str,
    expires: DateTime<Utc>,
    private_key: &PrivateKey,
) -> LicenseResult<LicenseRecord> {
    check_field("product", product)?;
    check_field("device_serial", device_serial)?;

    let expires = format_expires(expires);
    let message = canonical_message(product, device_serial, &expires);
    let signature = private_key.sign(&message)?;

    Ok(LicenseRecord {
        product: product.to_string(),
        device_serial: device_serial.to_string(),
        expires,
        signature,
    })
}

fn check_field(name: &'static str, value: &str) -> LicenseResult<()> {
    if value.trim().is_empty() {
        return Err(LicenseError::EmptyField(name));
    }
    if value.contains(FIELD_DELIMITER) {
        return Err(LicenseError::DelimiterInField(name));
    }
    Ok(())
}
