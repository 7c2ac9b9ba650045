//! Error types for signing and key handling.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while parsing keys or producing signatures.
///
/// A signature that fails to verify is not an error: verification reports
/// `false` instead.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be parsed or encoded.
    #[error("invalid key format: {0}")]
    KeyFormat(String),

    /// The signing primitive failed internally.
    #[error("signing failed: {0}")]
    Signing(String),
}
