//! Error types for the license layer.

use std::path::PathBuf;
use thiserror::Error;
use usblock_crypto::CryptoError;

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Why a persisted license could not be turned into a [`LicenseRecord`].
///
/// [`LicenseRecord`]: crate::LicenseRecord
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// One of the four mandatory fields is absent (or `null`).
    #[error("license is missing field `{0}`")]
    MissingField(&'static str),

    /// The text is not a license object at all, or a field has the wrong shape.
    #[error("malformed license: {0}")]
    Malformed(String),
}

/// Errors raised while issuing or loading licenses.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// A required field was empty.
    #[error("license field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// A field contains the canonical message delimiter.
    #[error("license field `{0}` must not contain the '|' delimiter")]
    DelimiterInField(&'static str),

    /// Key parsing or signing failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Persisted license text could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The encoded license could not be written.
    #[error("failed to write license to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
