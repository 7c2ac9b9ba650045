//! Agent configuration.
//!
//! Every field has a default, so an empty or partial TOML file is valid:
//!
//! ```toml
//! public_key_path = "/opt/usblock/public_key.pem"
//! settle_delay_ms = 2000
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{WatchError, WatchResult};

/// File name of the public key shipped next to the agent.
pub const PUBLIC_KEY_FILE_NAME: &str = "public_key.pem";

/// Relative path of the license file on a protected volume.
pub const DEFAULT_LICENSE_FILE_NAME: &str = "license.json";

/// Time allowed for a freshly attached filesystem to become readable.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1500;

/// Upper bound on attach events checked at once.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 8;

/// Mount-table polling period of the Linux backend.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Configuration for the watch loop and its platform backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Public key used to verify licenses.
    pub public_key_path: PathBuf,
    /// License file location relative to the volume root.
    pub license_file_name: String,
    /// Delay between an attach event and the serial lookup (ms).
    pub settle_delay_ms: u64,
    /// Maximum number of attach events processed concurrently.
    pub max_concurrent_checks: usize,
    /// Mount-table polling interval (ms).
    pub poll_interval_ms: u64,
    /// Mount table to watch.
    pub mounts_path: PathBuf,
    /// Root of the sysfs tree.
    pub sysfs_root: PathBuf,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            public_key_path: default_public_key_path(),
            license_file_name: DEFAULT_LICENSE_FILE_NAME.to_string(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            mounts_path: PathBuf::from("/proc/self/mounts"),
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl WatchConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> WatchResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: &Path) -> WatchResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> WatchResult<()> {
        if self.max_concurrent_checks == 0 {
            return Err(WatchError::Config(
                "max_concurrent_checks must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(WatchError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        let name = Path::new(&self.license_file_name);
        if self.license_file_name.trim().is_empty() || name.is_absolute() {
            return Err(WatchError::Config(
                "license_file_name must be a relative path".to_string(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `public_key.pem` in the directory holding the running executable.
fn default_public_key_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(PUBLIC_KEY_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(PUBLIC_KEY_FILE_NAME))
}
