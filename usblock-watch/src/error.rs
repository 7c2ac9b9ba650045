//! Error types for the watch layer.

use thiserror::Error;

/// Result type for watch operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Why the physical serial behind a volume could not be determined.
///
/// Each variant carries the volume identifier it was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceResolutionError {
    /// No mounted block device backs this volume.
    #[error("volume {0} is not mounted from a block device")]
    NotMounted(String),

    /// The disk is not attached through USB.
    #[error("disk behind {0} is not a removable USB device")]
    NotRemovable(String),

    /// The USB device does not report a serial number.
    #[error("disk behind {0} reports no serial number")]
    NoSerial(String),

    /// Platform lookup failed.
    #[error("device lookup failed: {0}")]
    Io(String),
}

/// Errors raised by the watch machinery itself.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The attach-event subscription could not be set up or torn down.
    #[error("attach subscription failed: {0}")]
    Subscription(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}
