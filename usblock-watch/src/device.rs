//! Platform capabilities the watch loop depends on.
//!
//! Two seams keep the loop independent of any OS query mechanism:
//! - [`AttachEventSource`]: a subscription yielding logical-volume identifiers
//! - [`SerialResolver`]: maps a volume to the physical serial of its disk

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::{DeviceResolutionError, WatchError, WatchResult};

/// Identifier of a logical volume: a mount point, or a drive letter such
/// as `E:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeId(String);

impl VolumeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is blank and cannot name a volume.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Filesystem root of the volume. A bare drive letter maps to its root
    /// directory rather than the drive's current directory.
    pub fn root(&self) -> PathBuf {
        let id = self.0.trim();
        if is_drive_letter(id) {
            PathBuf::from(format!("{id}\\"))
        } else {
            PathBuf::from(id)
        }
    }

    /// Location of the license file on this volume.
    pub fn license_path(&self, file_name: &str) -> PathBuf {
        self.root().join(file_name)
    }
}

fn is_drive_letter(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A removable volume became available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachEvent {
    pub volume: VolumeId,
}

impl AttachEvent {
    pub fn new(volume: impl Into<String>) -> Self {
        Self {
            volume: VolumeId::new(volume),
        }
    }
}

/// A subscription to device-attach notifications.
#[async_trait]
pub trait AttachEventSource: Send {
    /// Waits for the next attach event. Returns `None` once the
    /// subscription has ended.
    ///
    /// Must be cancel-safe: the loop races it against shutdown.
    async fn next_attach(&mut self) -> Option<AttachEvent>;

    /// Unregisters the subscription. Later calls to `next_attach` drain
    /// anything already queued and then return `None`.
    async fn unsubscribe(&mut self) -> WatchResult<()>;
}

/// Resolves the physical serial number of the disk behind a volume.
pub trait SerialResolver: Send + Sync {
    fn resolve_serial(&self, volume: &VolumeId) -> Result<String, DeviceResolutionError>;
}

/// Creates a channel-backed event source and the handle that feeds it.
pub fn channel_source(buffer: usize) -> (AttachSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (AttachSender(tx), ChannelSource { rx })
}

/// Feeds attach events into a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct AttachSender(mpsc::Sender<AttachEvent>);

impl AttachSender {
    /// Queues an attach event for `volume`.
    pub async fn attach(&self, volume: impl Into<String>) -> WatchResult<()> {
        self.0
            .send(AttachEvent::new(volume))
            .await
            .map_err(|_| WatchError::Subscription("event source closed".to_string()))
    }
}

/// Event source fed through an [`AttachSender`]; ends when every sender is
/// dropped or after `unsubscribe`.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<AttachEvent>,
}

#[async_trait]
impl AttachEventSource for ChannelSource {
    async fn next_attach(&mut self) -> Option<AttachEvent> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> WatchResult<()> {
        self.rx.close();
        Ok(())
    }
}

/// A fixed resolver for testing.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a fixed table; unknown volumes are `NotMounted`.
    #[derive(Debug, Default)]
    pub struct StaticResolver {
        answers: HashMap<String, Result<String, DeviceResolutionError>>,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers `serial` for `volume`.
        pub fn with_serial(mut self, volume: impl Into<String>, serial: impl Into<String>) -> Self {
            self.answers.insert(volume.into(), Ok(serial.into()));
            self
        }

        /// Registers a failure for `volume`.
        pub fn with_error(mut self, volume: impl Into<String>, err: DeviceResolutionError) -> Self {
            self.answers.insert(volume.into(), Err(err));
            self
        }

        /// Number of lookups performed so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SerialResolver for StaticResolver {
        fn resolve_serial(&self, volume: &VolumeId) -> Result<String, DeviceResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(volume.as_str())
                .cloned()
                .unwrap_or_else(|| Err(DeviceResolutionError::NotMounted(volume.to_string())))
        }
    }
}
