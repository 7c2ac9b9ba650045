//! Shared fixtures for watch tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use usblock_crypto::KeyPair;
use usblock_license::{encode, issue};
use usblock_watch::mock::StaticResolver;
use usblock_watch::LicenseGate;

pub const LICENSE_FILE: &str = "license.json";

/// The authority's key pair for these tests.
pub fn authority() -> KeyPair {
    KeyPair::from_seed(&[3u8; 32])
}

/// A key pair unrelated to [`authority`].
pub fn impostor() -> KeyPair {
    KeyPair::from_seed(&[4u8; 32])
}

pub fn in_a_year() -> DateTime<Utc> {
    Utc::now() + Duration::days(365)
}

/// Writes a license for `serial` onto the volume at `root`.
pub fn write_license(
    root: &Path,
    keys: &KeyPair,
    product: &str,
    serial: &str,
    expires: DateTime<Utc>,
) {
    let record = issue(product, serial, expires, &keys.private_key).unwrap();
    std::fs::write(root.join(LICENSE_FILE), encode(&record).unwrap()).unwrap();
}

/// A temporary directory standing in for a mounted volume.
pub fn volume() -> TempDir {
    tempfile::tempdir().unwrap()
}

pub fn volume_id(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

pub fn gate(resolver: StaticResolver) -> LicenseGate {
    LicenseGate::new(authority().public_key, Arc::new(resolver), LICENSE_FILE)
}
