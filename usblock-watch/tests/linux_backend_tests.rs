//! Mount-table watcher and sysfs serial lookup against a fake `/proc` and
//! `/sys` tree.

#![cfg(target_os = "linux")]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use usblock_watch::platform::linux::{parse_mounts, MountEntry, MountWatcher, SysfsSerialResolver};
use usblock_watch::{AttachEvent, AttachEventSource, DeviceResolutionError, SerialResolver, VolumeId};

const USB_PORT: &str = "devices/pci0000:00/0000:00:14.0/usb1/1-1";

// ── Fixtures ────────────────────────────────────────────────────

struct FakeHost {
    dir: TempDir,
}

impl FakeHost {
    fn new() -> Self {
        let host = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(host.sys().join("class/block")).unwrap();
        fs::write(host.mounts(), "proc /proc proc rw 0 0\n").unwrap();
        host
    }

    fn sys(&self) -> PathBuf {
        self.dir.path().join("sys")
    }

    fn mounts(&self) -> PathBuf {
        self.dir.path().join("mounts")
    }

    fn mount(&self, device: &str, mount_point: &str) {
        let mut text = fs::read_to_string(self.mounts()).unwrap();
        text.push_str(&format!("/dev/{device} {mount_point} vfat rw,nosuid 0 0\n"));
        self.replace_mounts(&text);
    }

    /// Swaps the mount table in one step so the poller never sees a
    /// half-written file.
    fn replace_mounts(&self, text: &str) {
        let staging = self.dir.path().join("mounts.new");
        fs::write(&staging, text).unwrap();
        fs::rename(staging, self.mounts()).unwrap();
    }

    /// Adds a USB mass-storage partition `name` with the given serial.
    fn usb_partition(&self, name: &str, serial: Option<&str>) {
        let usb = self.sys().join(USB_PORT);
        fs::create_dir_all(&usb).unwrap();
        fs::write(usb.join("idVendor"), "0781\n").unwrap();
        if let Some(serial) = serial {
            fs::write(usb.join("serial"), format!("{serial}\n")).unwrap();
        }
        let partition = usb.join(format!("1-1:1.0/host6/target6:0:0/6:0:0:0/block/{name}x/{name}"));
        self.link(name, &partition);
    }

    /// Adds a SATA partition `name`.
    fn sata_partition(&self, name: &str) {
        let partition = self
            .sys()
            .join("devices/pci0000:00/0000:00:17.0/ata1/host0/target0:0:0/0:0:0:0/block")
            .join(format!("{name}x/{name}"));
        self.link(name, &partition);
    }

    fn link(&self, name: &str, target: &Path) {
        fs::create_dir_all(target).unwrap();
        symlink(target, self.sys().join("class/block").join(name)).unwrap();
    }

    fn resolver(&self) -> SysfsSerialResolver {
        SysfsSerialResolver::new(self.mounts(), self.sys())
    }
}

// ── Mount table parsing ─────────────────────────────────────────

#[test]
fn parses_mount_lines() {
    let entries = parse_mounts(
        "sysfs /sys sysfs rw 0 0\n\
         /dev/sdb1 /media/alice/USB\\040STICK vfat rw 0 0\n\
         garbage\n",
    );
    assert_eq!(
        entries,
        vec![
            MountEntry {
                source: "sysfs".into(),
                mount_point: "/sys".into(),
                fs_type: "sysfs".into(),
            },
            MountEntry {
                source: "/dev/sdb1".into(),
                mount_point: "/media/alice/USB STICK".into(),
                fs_type: "vfat".into(),
            },
        ]
    );
}

// ── Serial resolution ───────────────────────────────────────────

#[test]
fn resolves_usb_serial() {
    let host = FakeHost::new();
    host.usb_partition("sdzq1", Some("4C530001230101"));
    host.mount("sdzq1", "/media/usb0");

    let serial = host.resolver().resolve_serial(&VolumeId::new("/media/usb0")).unwrap();
    assert_eq!(serial, "4C530001230101");
}

#[test]
fn unmounted_volume_is_not_mounted() {
    let host = FakeHost::new();
    let err = host.resolver().resolve_serial(&VolumeId::new("/media/usb0")).unwrap_err();
    assert_eq!(err, DeviceResolutionError::NotMounted("/media/usb0".into()));
}

#[test]
fn non_usb_disk_is_not_removable() {
    let host = FakeHost::new();
    host.sata_partition("sdzq2");
    host.mount("sdzq2", "/mnt/data");

    let err = host.resolver().resolve_serial(&VolumeId::new("/mnt/data")).unwrap_err();
    assert_eq!(err, DeviceResolutionError::NotRemovable("/mnt/data".into()));
}

#[test]
fn usb_device_without_serial() {
    let host = FakeHost::new();
    host.usb_partition("sdzq3", None);
    host.mount("sdzq3", "/media/usb1");

    let err = host.resolver().resolve_serial(&VolumeId::new("/media/usb1")).unwrap_err();
    assert_eq!(err, DeviceResolutionError::NoSerial("/media/usb1".into()));
}

#[test]
fn missing_sysfs_entry_is_io_error() {
    let host = FakeHost::new();
    host.mount("sdzq4", "/media/usb2");

    let err = host.resolver().resolve_serial(&VolumeId::new("/media/usb2")).unwrap_err();
    assert!(matches!(err, DeviceResolutionError::Io(_)));
}

// ── Mount watcher ───────────────────────────────────────────────

async fn next(watcher: &mut MountWatcher) -> Option<AttachEvent> {
    tokio::time::timeout(Duration::from_secs(5), watcher.next_attach())
        .await
        .expect("no attach event within 5s")
}

#[tokio::test]
async fn reports_new_mounts_only() {
    let host = FakeHost::new();
    host.mount("sdzq5", "/media/already-there");

    let mut watcher = MountWatcher::start(host.mounts(), Duration::from_millis(20))
        .await
        .unwrap();
    host.mount("sdzq6", "/media/new-stick");

    assert_eq!(next(&mut watcher).await, Some(AttachEvent::new("/media/new-stick")));

    watcher.unsubscribe().await.unwrap();
    assert_eq!(watcher.next_attach().await, None);
}

#[tokio::test]
async fn remount_is_reported_again() {
    let host = FakeHost::new();
    let mut watcher = MountWatcher::start(host.mounts(), Duration::from_millis(20))
        .await
        .unwrap();

    host.mount("sdzq7", "/media/stick");
    assert_eq!(next(&mut watcher).await, Some(AttachEvent::new("/media/stick")));

    // Unmount, let the watcher notice, then mount again.
    host.replace_mounts("proc /proc proc rw 0 0\n");
    tokio::time::sleep(Duration::from_millis(200)).await;
    host.mount("sdzq7", "/media/stick");
    assert_eq!(next(&mut watcher).await, Some(AttachEvent::new("/media/stick")));
}

#[tokio::test]
async fn different_device_at_same_mount_point_is_reported() {
    let host = FakeHost::new();
    host.mount("sdzq8", "/media/stick");
    let mut watcher = MountWatcher::start(host.mounts(), Duration::from_millis(20))
        .await
        .unwrap();

    // One stick swapped for another at the same mount point in a single step.
    host.replace_mounts("proc /proc proc rw 0 0\n/dev/sdzq9 /media/stick vfat rw 0 0\n");
    assert_eq!(next(&mut watcher).await, Some(AttachEvent::new("/media/stick")));
}

#[tokio::test]
async fn missing_mount_table_fails_to_start() {
    let result = MountWatcher::start(PathBuf::from("/nonexistent/mounts"), Duration::from_millis(20)).await;
    assert!(result.is_err());
}
