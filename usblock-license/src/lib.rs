//! Device-bound licenses for usblock.
//!
//! This crate handles:
//! - The canonical license record and the message its signature covers
//! - Encoding to and decoding from the persisted JSON form
//! - Offline issuance with the authority's private key
//! - Verification of signature and expiry with the distributed public key
//!
//! # Canonical Message
//!
//! The signature covers `product|device_serial|expires` where `expires` is
//! rendered as `YYYY-MM-DDThh:mm:ssZ`. Changing any of the three fields after
//! signing invalidates the license.
//!
//! Matching a license to the device it sits on is a separate step
//! ([`matches_device`]) because the verifier has no notion of an attached
//! device.

mod error;
mod issuer;
mod record;
mod verifier;

pub use error::{DecodeError, LicenseError, LicenseResult};
pub use issuer::{issue, LicenseIssuer};
pub use record::{
    canonical_message, decode, encode, format_expires, parse_expires, LicenseRecord,
    EXPIRES_FORMAT, FIELD_DELIMITER,
};
pub use verifier::{matches_device, verify, LicenseVerifier, VerificationOutcome};
