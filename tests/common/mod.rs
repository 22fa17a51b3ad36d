// In-memory stand-ins for the bus, the notifier and statvfs
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use storwatch::properties::{
    BLOCK_INTERFACE, DRIVE_INTERFACE, FILESYSTEM_INTERFACE, JOB_INTERFACE, PARTITION_INTERFACE,
    PARTITION_TABLE_INTERFACE,
};
use storwatch::{
    BusSignal, Event, FreeSpace, InterfacesAndProperties, Notifier, ObjectPath, PushMessage,
    SignalStream, StorageBus, WatchError, WatchResult,
};

pub const DRIVE: &str = "/org/freedesktop/UDisks2/drives/Kingston_DataTraveler_1234";
pub const DISK: &str = "/org/freedesktop/UDisks2/block_devices/sdb";
pub const BLOCK: &str = "/org/freedesktop/UDisks2/block_devices/sdb1";
pub const SYSTEM_DRIVE: &str = "/org/freedesktop/UDisks2/drives/Samsung_SSD_970";
pub const SYSTEM_BLOCK: &str = "/org/freedesktop/UDisks2/block_devices/nvme0n1p1";
pub const JOB: &str = "/org/freedesktop/UDisks2/jobs/42";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(150);

pub fn removable_drive() -> InterfacesAndProperties {
    InterfacesAndProperties::new()
        .with(DRIVE_INTERFACE, "MediaRemovable", true)
        .with(DRIVE_INTERFACE, "Vendor", "Kingston")
        .with(DRIVE_INTERFACE, "Model", "DataTraveler")
}

pub fn fixed_drive() -> InterfacesAndProperties {
    InterfacesAndProperties::new()
        .with(DRIVE_INTERFACE, "MediaRemovable", false)
        .with(DRIVE_INTERFACE, "Model", "Samsung SSD 970")
}

/// Unmounted filesystem block of type `fs` on `drive`.
pub fn fs_block(drive: &str, fs: &str) -> InterfacesAndProperties {
    InterfacesAndProperties::new()
        .with(BLOCK_INTERFACE, "Drive", drive)
        .with(BLOCK_INTERFACE, "IdType", fs)
        .with(FILESYSTEM_INTERFACE, "MountPoints", Vec::<String>::new())
}

pub fn vfat_block(drive: &str) -> InterfacesAndProperties {
    fs_block(drive, "vfat")
}

pub fn partition_block(drive: &str) -> InterfacesAndProperties {
    vfat_block(drive)
        .with(PARTITION_INTERFACE, "UUID", "0d2e-11aa")
        .with(PARTITION_INTERFACE, "Table", DISK)
}

pub fn partitionable_disk(drive: &str) -> InterfacesAndProperties {
    InterfacesAndProperties::new()
        .with(BLOCK_INTERFACE, "Drive", drive)
        .with(BLOCK_INTERFACE, "HintPartitionable", true)
        .with(BLOCK_INTERFACE, "IdType", "")
        .with_interface(PARTITION_TABLE_INTERFACE)
}

pub fn job_props(operation: &str, objects: &[&str]) -> InterfacesAndProperties {
    InterfacesAndProperties::new()
        .with(JOB_INTERFACE, "Operation", operation)
        .with(JOB_INTERFACE, "Objects", objects)
}

pub fn job_finished(path: &str) -> Event {
    Event::removal(path, [JOB_INTERFACE])
}

/// Receives with a timeout, panicking if nothing arrives.
pub async fn recv<T>(rx: &flume::Receiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv_async())
        .await
        .expect("timed out waiting for channel")
        .expect("channel closed")
}

/// Asserts nothing arrives for a short while.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &flume::Receiver<T>) {
    if let Ok(Ok(value)) = tokio::time::timeout(SILENCE, rx.recv_async()).await {
        panic!("unexpected value on channel: {:?}", value);
    }
}

/// Asserts the channel reports closed.
pub async fn assert_closed<T: std::fmt::Debug>(rx: &flume::Receiver<T>) {
    match tokio::time::timeout(RECV_TIMEOUT, rx.recv_async()).await {
        Ok(Err(_)) => {}
        Ok(Ok(value)) => panic!("expected closed channel, got {:?}", value),
        Err(_) => panic!("timed out waiting for channel to close"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Mount(ObjectPath),
    Unmount(ObjectPath),
    Format(ObjectPath, String),
    DeletePartition(ObjectPath),
}

type SignalSender = mpsc::UnboundedSender<WatchResult<Event>>;
type SignalReceiver = mpsc::UnboundedReceiver<WatchResult<Event>>;

/// Scripted storage bus. Signals are injected with `emit_*`.
pub struct MockBus {
    added_tx: SignalSender,
    removed_tx: SignalSender,
    added_rx: Mutex<Option<SignalReceiver>>,
    removed_rx: Mutex<Option<SignalReceiver>>,
    objects: Mutex<HashMap<ObjectPath, InterfacesAndProperties>>,
    calls: Mutex<Vec<BusCall>>,
    mount_root: Mutex<PathBuf>,
    failing_signal: Mutex<Option<BusSignal>>,
    fail_enumeration: AtomicBool,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
    fail_delete: AtomicBool,
}

impl MockBus {
    pub fn new() -> Self {
        let (added_tx, added_rx) = mpsc::unbounded();
        let (removed_tx, removed_rx) = mpsc::unbounded();
        Self {
            added_tx,
            removed_tx,
            added_rx: Mutex::new(Some(added_rx)),
            removed_rx: Mutex::new(Some(removed_rx)),
            objects: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            mount_root: Mutex::new(PathBuf::from("/media/phablet")),
            failing_signal: Mutex::new(None),
            fail_enumeration: AtomicBool::new(false),
            fail_mount: AtomicBool::new(false),
            fail_unmount: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn with_object(self, path: &str, props: InterfacesAndProperties) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(ObjectPath::from(path), props);
        self
    }

    pub fn with_mount_root(self, root: &Path) -> Self {
        *self.mount_root.lock().unwrap() = root.to_path_buf();
        self
    }

    pub fn fail_subscription(&self, signal: BusSignal) {
        *self.failing_signal.lock().unwrap() = Some(signal);
    }

    pub fn fail_enumeration(&self) {
        self.fail_enumeration.store(true, Ordering::SeqCst);
    }

    pub fn fail_mount(&self) {
        self.fail_mount.store(true, Ordering::SeqCst);
    }

    pub fn fail_unmount(&self) {
        self.fail_unmount.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn emit_added(&self, path: &str, props: InterfacesAndProperties) {
        self.added_tx
            .unbounded_send(Ok(Event::addition(path, props)))
            .unwrap();
    }

    pub fn emit_removed(&self, path: &str, interfaces: &[&str]) {
        self.removed_tx
            .unbounded_send(Ok(Event::removal(path, interfaces.iter().copied())))
            .unwrap();
    }

    pub fn emit_removal_event(&self, event: Event) {
        self.removed_tx.unbounded_send(Ok(event)).unwrap();
    }

    pub fn emit_garbage(&self) {
        self.added_tx
            .unbounded_send(Err(WatchError::Decode("truncated body".to_string())))
            .unwrap();
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mountpoint_for(&self, path: &ObjectPath) -> String {
        let name = path.as_str().rsplit('/').next().unwrap_or_default();
        self.mount_root
            .lock()
            .unwrap()
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    fn record(&self, call: BusCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StorageBus for MockBus {
    async fn subscribe(&self, signal: BusSignal) -> WatchResult<SignalStream> {
        if *self.failing_signal.lock().unwrap() == Some(signal) {
            return Err(WatchError::subscription(signal.member(), "match rule rejected"));
        }
        let slot = match signal {
            BusSignal::InterfacesAdded => &self.added_rx,
            BusSignal::InterfacesRemoved => &self.removed_rx,
        };
        let rx = slot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| WatchError::subscription(signal.member(), "already subscribed"))?;
        Ok(rx.boxed())
    }

    async fn managed_objects(&self) -> WatchResult<HashMap<ObjectPath, InterfacesAndProperties>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(WatchError::Bus("GetManagedObjects timed out".to_string()));
        }
        Ok(self.objects.lock().unwrap().clone())
    }

    async fn mount(&self, path: &ObjectPath) -> WatchResult<String> {
        self.record(BusCall::Mount(path.clone()));
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(WatchError::Bus(format!("Failed to mount {}", path)));
        }
        Ok(self.mountpoint_for(path))
    }

    async fn unmount(&self, path: &ObjectPath) -> WatchResult<()> {
        self.record(BusCall::Unmount(path.clone()));
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(WatchError::Bus(format!("Failed to unmount {}", path)));
        }
        Ok(())
    }

    async fn format(&self, path: &ObjectPath, fs_type: &str) -> WatchResult<()> {
        self.record(BusCall::Format(path.clone(), fs_type.to_string()));
        Ok(())
    }

    async fn delete_partition(&self, path: &ObjectPath) -> WatchResult<()> {
        self.record(BusCall::DeletePartition(path.clone()));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(WatchError::Bus(format!("Failed to delete partition {}", path)));
        }
        Ok(())
    }
}

/// Keeps every message it is asked to send.
pub struct RecordingNotifier {
    tx: flume::Sender<PushMessage>,
    rx: flume::Receiver<PushMessage>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn next(&self) -> PushMessage {
        recv(&self.rx).await
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.rx.drain().collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &PushMessage) -> WatchResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WatchError::Notification("Postal unavailable".to_string()));
        }
        self.tx
            .send(message.clone())
            .map_err(|e| WatchError::Notification(e.to_string()))
    }
}

/// Reports preset percentages; unknown paths fail like a vanished mount.
pub struct FixedFreeSpace {
    percentages: Mutex<HashMap<PathBuf, u64>>,
}

impl FixedFreeSpace {
    pub fn new() -> Self {
        Self {
            percentages: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, path: &str, percentage: u64) {
        self.percentages
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), percentage);
    }
}

impl FreeSpace for FixedFreeSpace {
    fn free_percentage(&self, mountpoint: &Path) -> WatchResult<u64> {
        self.percentages
            .lock()
            .unwrap()
            .get(mountpoint)
            .copied()
            .ok_or_else(|| {
                WatchError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not mounted", mountpoint.display()),
                ))
            })
    }
}
