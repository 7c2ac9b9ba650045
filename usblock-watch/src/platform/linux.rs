//! Linux backend: mount-table polling and sysfs serial lookup.
//!
//! A USB stick appears as a new `/dev/sdXN` entry in the mount table once
//! it has been mounted (by udisks, systemd-mount, fstab automount or the
//! user). Its physical serial is the `serial` attribute of the USB device
//! node that the block device hangs off in sysfs.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::device::{AttachEvent, AttachEventSource, SerialResolver, VolumeId};
use crate::error::{DeviceResolutionError, WatchError, WatchResult};

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device, e.g. `/dev/sdb1`.
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// Parses `/proc/self/mounts` content. Malformed lines are skipped.
pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                source: unescape(source),
                mount_point: PathBuf::from(unescape(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Decodes the kernel's octal escapes (`\040` for space, `\011` for tab,
/// `\012` for newline, `\134` for backslash).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Block-device mounts, keyed by mount point and source device so a
/// different device appearing at a known mount point counts as new.
fn block_mounts(text: &str) -> BTreeSet<(PathBuf, String)> {
    parse_mounts(text)
        .into_iter()
        .filter(|m| m.source.starts_with("/dev/"))
        .map(|m| (m.mount_point, m.source))
        .collect()
}

/// Attach-event source that polls the mount table for new block-device
/// mounts.
///
/// A mount is identified by mount point and source device. The same device
/// unmounted and mounted again at the same place between two polls is not
/// observed.
pub struct MountWatcher {
    rx: mpsc::Receiver<AttachEvent>,
    poller: Option<JoinHandle<()>>,
}

impl MountWatcher {
    /// Takes a baseline snapshot of `mounts_path` and starts polling it
    /// every `interval`. Volumes mounted before the call are not reported.
    pub async fn start(mounts_path: PathBuf, interval: Duration) -> WatchResult<Self> {
        let text = tokio::fs::read_to_string(&mounts_path).await.map_err(|e| {
            WatchError::Subscription(format!("cannot read {}: {e}", mounts_path.display()))
        })?;
        let baseline = block_mounts(&text);
        debug!(mounts = baseline.len(), "mount table baseline taken");

        let (tx, rx) = mpsc::channel(32);
        let poller = tokio::spawn(poll_mounts(mounts_path, interval, baseline, tx));
        Ok(Self {
            rx,
            poller: Some(poller),
        })
    }
}

async fn poll_mounts(
    mounts_path: PathBuf,
    interval: Duration,
    mut known: BTreeSet<(PathBuf, String)>,
    tx: mpsc::Sender<AttachEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let text = match tokio::fs::read_to_string(&mounts_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("cannot read {}: {e}", mounts_path.display());
                continue;
            }
        };

        let current = block_mounts(&text);
        for (mount_point, source) in current.difference(&known) {
            debug!(mount_point = %mount_point.display(), %source, "new block mount");
            let event = AttachEvent::new(mount_point.to_string_lossy());
            if tx.send(event).await.is_err() {
                return;
            }
        }
        known = current;
    }
}

#[async_trait]
impl AttachEventSource for MountWatcher {
    async fn next_attach(&mut self) -> Option<AttachEvent> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> WatchResult<()> {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.rx.close();
        Ok(())
    }
}

impl Drop for MountWatcher {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

/// Resolves serials by following a mount point to its USB device in sysfs.
#[derive(Debug, Clone)]
pub struct SysfsSerialResolver {
    mounts_path: PathBuf,
    sysfs_root: PathBuf,
}

impl Default for SysfsSerialResolver {
    fn default() -> Self {
        Self::new("/proc/self/mounts", "/sys")
    }
}

impl SysfsSerialResolver {
    pub fn new(mounts_path: impl Into<PathBuf>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    /// Block device mounted at `volume`. The most recent mount wins when a
    /// mount point is stacked.
    fn source_device(&self, volume: &VolumeId) -> Result<String, DeviceResolutionError> {
        let text = fs::read_to_string(&self.mounts_path)
            .map_err(|e| DeviceResolutionError::Io(format!("{}: {e}", self.mounts_path.display())))?;
        let target = Path::new(volume.as_str().trim());
        parse_mounts(&text)
            .into_iter()
            .rev()
            .find(|m| m.mount_point == target && m.source.starts_with("/dev/"))
            .map(|m| m.source)
            .ok_or_else(|| DeviceResolutionError::NotMounted(volume.to_string()))
    }
}

impl SerialResolver for SysfsSerialResolver {
    fn resolve_serial(&self, volume: &VolumeId) -> Result<String, DeviceResolutionError> {
        let source = self.source_device(volume)?;

        // /dev/disk/by-uuid/... and friends are symlinks to the real node.
        let node = fs::canonicalize(&source).unwrap_or_else(|_| PathBuf::from(&source));
        let name = node
            .file_name()
            .ok_or_else(|| DeviceResolutionError::NotMounted(volume.to_string()))?;

        let class_link = self.sysfs_root.join("class").join("block").join(name);
        let device_path = fs::canonicalize(&class_link)
            .map_err(|e| DeviceResolutionError::Io(format!("{}: {e}", class_link.display())))?;

        if !is_usb_path(&device_path) {
            return Err(DeviceResolutionError::NotRemovable(volume.to_string()));
        }

        let root = fs::canonicalize(&self.sysfs_root).unwrap_or_else(|_| self.sysfs_root.clone());
        let usb_device = device_path
            .ancestors()
            .take_while(|dir| dir.starts_with(&root))
            .find(|dir| dir.join("idVendor").is_file())
            .ok_or_else(|| DeviceResolutionError::NotRemovable(volume.to_string()))?;

        let serial = fs::read_to_string(usb_device.join("serial"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if serial.is_empty() {
            return Err(DeviceResolutionError::NoSerial(volume.to_string()));
        }

        debug!(
            volume = %volume,
            device = %usb_device.display(),
            "resolved USB device"
        );
        Ok(serial)
    }
}

/// True when the sysfs device path passes through a USB bus (`usbN`).
fn is_usb_path(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .and_then(|s| s.strip_prefix("usb"))
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}
