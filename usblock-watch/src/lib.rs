//! Removable-device watch loop for usblock.
//!
//! Reacts to removable storage being attached, resolves the physical serial
//! of the underlying disk, loads the license stored on the volume, and
//! accepts it only if it verifies and is bound to that very disk.
//!
//! # Components
//!
//! - **Device**: capability traits for attach notifications and serial lookup
//! - **Gate**: the per-volume resolve → load → verify → match check
//! - **Watcher**: the concurrent event loop with settle delay and bounded fan-out
//! - **Platform**: the Linux mount-table / sysfs backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usblock_crypto::KeyPair;
//! use usblock_watch::{channel_source, mock::StaticResolver, LicenseGate, WatchConfig, WatchLoop};
//!
//! # async fn demo() {
//! let config = WatchConfig::default();
//! let resolver = Arc::new(StaticResolver::new().with_serial("/media/usb0", "SN-001"));
//! let gate = LicenseGate::new(KeyPair::generate().public_key, resolver, "license.json");
//! let watch_loop = WatchLoop::new(gate, &config);
//!
//! let (events, mut source) = channel_source(16);
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! events.attach("/media/usb0").await.unwrap();
//! drop(events);
//! let summary = watch_loop.run(&mut source, stop_rx).await;
//! assert_eq!(summary.processed, 1);
//! # }
//! ```

mod config;
mod device;
mod error;
mod gate;
pub mod platform;
mod watcher;

pub use config::{
    WatchConfig, DEFAULT_LICENSE_FILE_NAME, DEFAULT_MAX_CONCURRENT_CHECKS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_SETTLE_DELAY_MS, PUBLIC_KEY_FILE_NAME,
};
pub use device::{
    channel_source, mock, AttachEvent, AttachEventSource, AttachSender, ChannelSource,
    SerialResolver, VolumeId,
};
pub use error::{DeviceResolutionError, WatchError, WatchResult};
pub use gate::{CheckOutcome, LicenseGate, RejectReason, MAX_LICENSE_FILE_SIZE};
pub use watcher::{AttachReport, WatchLoop, WatchState, WatchSummary};
