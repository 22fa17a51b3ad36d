//! StorageWatcher service
//!
//! Keeps a device graph in sync with UDisks2 and drives the mount, unmount and
//! format operations on it. Results reach consumers through channels handed out
//! by the `subscribe_*` methods; subscribe before calling [`StorageWatcher::init`].
//!
//! Every state-changing bus call only means "request accepted". Completion of
//! unmounts and formats is learned from the job objects UDisks2 publishes, which
//! is why a finished mkfs job queues its devices for a remount on their next
//! addition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use flume::{Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::StorageBus;
use crate::cancellable::Cancellable;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::drive::Drive;
use crate::error::{WatchError, WatchResult};
use crate::event::{Event, ObjectKind, ObjectPath};
use crate::job::{Job, JobManager, JobOperation};
use crate::model::devices::{Attachment, DeviceGraph};
use crate::properties::FILESYSTEM_INTERFACE;

/// A filesystem that was mounted on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEvent {
    pub path: ObjectPath,
    pub mountpoint: String,
}

/// Verdict of the mount-eligibility policy for a block addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mountability {
    Eligible,
    Rejected,
    /// Present filesystem outside the allow-list.
    UnhandledFileSystem(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    DriveAdded,
    BlockAttached {
        drive: ObjectPath,
        mountability: Mountability,
        /// The block was pending a remount and a mount was started for it.
        remounted: bool,
    },
    Unhandled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Mount point published as removed.
    pub mountpoint: Option<String>,
    pub drive_removed: bool,
    pub block_removed: bool,
}

#[derive(Debug, Default)]
struct WatcherState {
    graph: DeviceGraph,
    mountpoints: HashMap<ObjectPath, String>,
    pending_mounts: Vec<ObjectPath>,
}

impl WatcherState {
    fn take_pending(&mut self, path: &ObjectPath) -> bool {
        match self.pending_mounts.iter().position(|pending| pending == path) {
            Some(index) => {
                self.pending_mounts.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Subscribers {
    additions: Option<Sender<Event>>,
    block_errors: Option<Sender<WatchError>>,
    mount_removed: Option<Sender<String>>,
    block_presence: Option<Sender<bool>>,
    format: Option<Sender<Job>>,
    format_errors: Option<Sender<WatchError>>,
    unmounts: Option<Sender<String>>,
    unmount_errors: Option<Sender<WatchError>>,
    mounts: Option<Sender<MountEvent>>,
    mount_errors: Option<Sender<WatchError>>,
}

#[derive(Default)]
struct Runtime {
    dispatcher: Option<Dispatcher>,
    jobs: Option<JobManager>,
    multiplexer: Option<JoinHandle<()>>,
}

struct Inner {
    bus: Arc<dyn StorageBus>,
    supported: Vec<String>,
    format_filesystem: String,
    state: Mutex<WatcherState>,
    start_lock: Mutex<()>,
    subscribers: StdMutex<Subscribers>,
    runtime: Mutex<Runtime>,
    cancellable: Cancellable,
}

/// Receivers the multiplexer selects over.
struct Feeds {
    additions: Receiver<Event>,
    removals: Receiver<Event>,
    erase_jobs: Receiver<Job>,
    mkfs_jobs: Receiver<Job>,
    unmount_jobs: Receiver<Job>,
    mount_jobs: Receiver<Job>,
}

/// Cloneable handle to the watcher.
#[derive(Clone)]
pub struct StorageWatcher {
    inner: Arc<Inner>,
}

impl StorageWatcher {
    pub fn new(bus: Arc<dyn StorageBus>, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                supported: config.sorted_filesystems(),
                format_filesystem: config.format_filesystem.clone(),
                state: Mutex::new(WatcherState::default()),
                start_lock: Mutex::new(()),
                subscribers: StdMutex::new(Subscribers::default()),
                runtime: Mutex::new(Runtime::default()),
                cancellable: Cancellable::new(),
            }),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mountable block additions and the block errors (unhandled filesystems).
    ///
    /// A block remounted after a completed mkfs job is mounted directly and is
    /// published on neither channel; its result arrives on the mount channels.
    pub fn subscribe_add_events(&self) -> (Receiver<Event>, Receiver<WatchError>) {
        let (tx, rx) = flume::bounded(0);
        let (err_tx, err_rx) = flume::bounded(0);
        let mut subscribers = self.subscribers();
        subscribers.additions = Some(tx);
        subscribers.block_errors = Some(err_tx);
        (rx, err_rx)
    }

    /// Mount points whose device went away.
    pub fn subscribe_remove_events(&self) -> Receiver<String> {
        let (tx, rx) = flume::bounded(0);
        self.subscribers().mount_removed = Some(tx);
        rx
    }

    /// `true` on every block attach, `false` on every removal.
    pub fn subscribe_block_device_events(&self) -> Receiver<bool> {
        let (tx, rx) = flume::bounded(0);
        self.subscribers().block_presence = Some(tx);
        rx
    }

    /// Erase and mkfs jobs, started and completed, plus format failures.
    pub fn subscribe_format_events(&self) -> (Receiver<Job>, Receiver<WatchError>) {
        let (tx, rx) = flume::bounded(0);
        let (err_tx, err_rx) = flume::bounded(0);
        let mut subscribers = self.subscribers();
        subscribers.format = Some(tx);
        subscribers.format_errors = Some(err_tx);
        (rx, err_rx)
    }

    /// Mount points released by completed unmount jobs, plus unmount failures.
    pub fn subscribe_unmount_events(&self) -> (Receiver<String>, Receiver<WatchError>) {
        let (tx, rx) = flume::bounded(0);
        let (err_tx, err_rx) = flume::bounded(0);
        let mut subscribers = self.subscribers();
        subscribers.unmounts = Some(tx);
        subscribers.unmount_errors = Some(err_tx);
        (rx, err_rx)
    }

    pub fn subscribe_mount_events(&self) -> (Receiver<MountEvent>, Receiver<WatchError>) {
        let (tx, rx) = flume::bounded(0);
        let (err_tx, err_rx) = flume::bounded(0);
        let mut subscribers = self.subscribers();
        subscribers.mounts = Some(tx);
        subscribers.mount_errors = Some(err_tx);
        (rx, err_rx)
    }

    /// Sends on a subscriber slot; skipped when nobody subscribed. Gives up when
    /// the watcher shuts down while the consumer is not receiving.
    async fn publish<T>(&self, slot: impl FnOnce(&Subscribers) -> Option<Sender<T>>, value: T) {
        let sender = {
            let subscribers = self.subscribers();
            slot(&*subscribers)
        };
        let Some(sender) = sender else {
            return;
        };
        tokio::select! {
            _ = self.inner.cancellable.cancelled() => {
                debug!("Watcher shutting down, publish abandoned");
            }
            sent = sender.send_async(value) => {
                if sent.is_err() {
                    debug!("Subscriber went away");
                }
            }
        }
    }

    /// Connects to the bus, starts the workers and replays the existing devices.
    ///
    /// Fails only when the signal subscriptions cannot be set up. A second call is a
    /// no-op.
    pub async fn init(&self) -> WatchResult<()> {
        {
            let mut runtime = self.inner.runtime.lock().await;
            if runtime.dispatcher.is_some() {
                return Ok(());
            }

            let dispatcher = Dispatcher::connect(self.inner.bus.as_ref()).await?;
            let jobs = JobManager::spawn(dispatcher.jobs());
            let feeds = Feeds {
                additions: dispatcher.additions(),
                removals: dispatcher.removals(),
                erase_jobs: jobs.erase_jobs(),
                mkfs_jobs: jobs.mkfs_jobs(),
                unmount_jobs: jobs.unmount_jobs(),
                mount_jobs: jobs.mount_jobs(),
            };
            let watcher = self.clone();
            runtime.multiplexer = Some(tokio::spawn(async move { watcher.multiplex(feeds).await }));
            runtime.dispatcher = Some(dispatcher);
            runtime.jobs = Some(jobs);
        }

        if let Err(e) = self.enumerate().await {
            error!("Failed to enumerate storage devices: {}", e);
        }
        info!("Storage watcher started");
        Ok(())
    }

    /// Replays every managed object, drives before blocks, through the addition path.
    async fn enumerate(&self) -> WatchResult<()> {
        let _start = self.inner.start_lock.lock().await;
        let objects = self.inner.bus.managed_objects().await?;

        let mut drives = Vec::new();
        let mut blocks = Vec::new();
        for (path, props) in objects {
            match path.kind() {
                ObjectKind::Drive => drives.push(Event::addition(path, props)),
                ObjectKind::Block => blocks.push(Event::addition(path, props)),
                ObjectKind::Job | ObjectKind::Unhandled => {}
            }
        }
        drives.sort_by(|a, b| a.path.cmp(&b.path));
        blocks.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(drives = drives.len(), blocks = blocks.len(), "Enumerated objects");

        for event in drives.into_iter().chain(blocks) {
            let path = event.path.clone();
            if let Err(e) = self.process_add_event(event).await {
                warn!(path = %path, "Issues while processing enumerated object: {}", e);
            }
        }
        Ok(())
    }

    async fn multiplex(self, feeds: Feeds) {
        loop {
            tokio::select! {
                _ = self.inner.cancellable.cancelled() => break,
                event = feeds.additions.recv_async() => {
                    let Ok(event) = event else { break };
                    let _start = self.inner.start_lock.lock().await;
                    let path = event.path.clone();
                    if let Err(e) = self.process_add_event(event).await {
                        warn!(path = %path, "Issues while processing addition: {}", e);
                    }
                }
                event = feeds.removals.recv_async() => {
                    let Ok(event) = event else { break };
                    let _start = self.inner.start_lock.lock().await;
                    let path = event.path.clone();
                    if let Err(e) = self.process_remove_event(event).await {
                        warn!(path = %path, "Issues while processing removal: {}", e);
                    }
                }
                job = feeds.mkfs_jobs.recv_async() => {
                    let Ok(job) = job else { break };
                    let _start = self.inner.start_lock.lock().await;
                    self.handle_format_job(job).await;
                }
                job = feeds.erase_jobs.recv_async() => {
                    let Ok(job) = job else { break };
                    let _start = self.inner.start_lock.lock().await;
                    self.handle_format_job(job).await;
                }
                job = feeds.unmount_jobs.recv_async() => {
                    let Ok(job) = job else { break };
                    let _start = self.inner.start_lock.lock().await;
                    self.handle_unmount_job(job).await;
                }
                job = feeds.mount_jobs.recv_async() => {
                    let Ok(job) = job else { break };
                    debug!(
                        path = %job.path(),
                        completed = job.was_completed,
                        objects = ?job.paths,
                        "Mount job"
                    );
                }
            }
        }
        debug!("Storage watcher multiplexer stopped");
    }

    async fn handle_format_job(&self, job: Job) {
        if job.was_completed && job.operation == JobOperation::Mkfs {
            let mut state = self.inner.state.lock().await;
            for path in &job.paths {
                if !state.pending_mounts.contains(path) {
                    debug!(path = %path, "Queueing remount after format");
                    state.pending_mounts.push(path.clone());
                }
            }
        }
        self.publish(|s| s.format.clone(), job).await;
    }

    async fn handle_unmount_job(&self, job: Job) {
        if !job.was_completed {
            debug!(path = %job.path(), "Unmount job started");
            return;
        }
        let released: Vec<String> = {
            let mut state = self.inner.state.lock().await;
            job.paths
                .iter()
                .filter_map(|path| state.mountpoints.remove(path))
                .collect()
        };
        for mountpoint in released {
            info!(mountpoint = %mountpoint, "Unmounted");
            self.publish(|s| s.unmounts.clone(), mountpoint).await;
        }
    }

    /// Processes one drive or block addition.
    ///
    /// Graph mutation happens under the graph lock; publishing happens after it is
    /// released.
    pub async fn process_add_event(&self, event: Event) -> WatchResult<AddOutcome> {
        let outcome = {
            let mut state = self.inner.state.lock().await;

            let remounted = event.props.is_filesystem() && state.take_pending(&event.path);
            if remounted {
                info!(path = %event.path, "Remounting formatted device");
                self.mount(&event);
            }

            match state.graph.add_interface(&event)? {
                Attachment::Drive => AddOutcome::DriveAdded,
                Attachment::Unhandled => AddOutcome::Unhandled,
                Attachment::Block { drive } => {
                    let mountability = match state
                        .graph
                        .desired_mountable_event(&event, &self.inner.supported)
                    {
                        Ok(true) => Mountability::Eligible,
                        Ok(false) => Mountability::Rejected,
                        Err(WatchError::UnhandledFileSystem(fs)) => {
                            Mountability::UnhandledFileSystem(fs)
                        }
                        Err(e) => return Err(e),
                    };
                    AddOutcome::BlockAttached {
                        drive,
                        mountability,
                        remounted,
                    }
                }
            }
        };

        if let AddOutcome::BlockAttached {
            mountability,
            remounted,
            ..
        } = &outcome
        {
            match mountability {
                Mountability::Eligible if !remounted => {
                    debug!(path = %event.path, "Mountable block device added");
                    self.publish(|s| s.additions.clone(), event).await;
                }
                Mountability::UnhandledFileSystem(fs) if !remounted => {
                    warn!(path = %event.path, fs = %fs, "Unhandled filesystem");
                    self.publish(
                        |s| s.block_errors.clone(),
                        WatchError::UnhandledFileSystem(fs.clone()),
                    )
                    .await;
                }
                _ => {}
            }
            self.publish(|s| s.block_presence.clone(), true).await;
        }

        Ok(outcome)
    }

    /// Processes one drive or block removal.
    ///
    /// A recorded mount point whose removal does not take the filesystem interface
    /// with it is reported as a consistency error, after the rest of the removal
    /// has been applied.
    pub async fn process_remove_event(&self, event: Event) -> WatchResult<RemoveOutcome> {
        let mut outcome = RemoveOutcome::default();
        let mut inconsistency = None;
        {
            let mut state = self.inner.state.lock().await;
            if let Some(mountpoint) = state.mountpoints.remove(&event.path) {
                debug!(path = %event.path, mountpoint = %mountpoint, "Removing mountpoint");
                if event.lost_interface(FILESYSTEM_INTERFACE) {
                    outcome.mountpoint = Some(mountpoint);
                } else {
                    inconsistency = Some(WatchError::Consistency(format!(
                        "{} mounted at {} but did not lose its filesystem interface",
                        event.path, mountpoint
                    )));
                }
            }

            match event.path.kind() {
                ObjectKind::Drive => {
                    outcome.drive_removed = state.graph.remove_drive(&event.path).is_some();
                }
                ObjectKind::Block => {
                    outcome.block_removed = state
                        .graph
                        .remove_block_interfaces(&event.path, &event.interfaces);
                }
                ObjectKind::Job | ObjectKind::Unhandled => {}
            }
        }

        if let Some(mountpoint) = outcome.mountpoint.clone() {
            info!(mountpoint = %mountpoint, "Mounted device removed");
            self.publish(|s| s.mount_removed.clone(), mountpoint).await;
        }
        self.publish(|s| s.block_presence.clone(), false).await;

        match inconsistency {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Mounts the filesystem behind `event` on a detached task.
    ///
    /// The result arrives on the mount channels.
    pub fn mount(&self, event: &Event) -> JoinHandle<()> {
        let watcher = self.clone();
        let path = event.path.clone();
        tokio::spawn(async move {
            match watcher.inner.bus.mount(&path).await {
                Ok(mountpoint) => {
                    info!(path = %path, mountpoint = %mountpoint, "Mounted");
                    watcher
                        .inner
                        .state
                        .lock()
                        .await
                        .mountpoints
                        .insert(path.clone(), mountpoint.clone());
                    watcher
                        .publish(|s| s.mounts.clone(), MountEvent { path, mountpoint })
                        .await;
                }
                Err(e) => {
                    error!(path = %path, "Mount failed: {}", e);
                    watcher.publish(|s| s.mount_errors.clone(), e).await;
                }
            }
        })
    }

    async fn mounted_blocks(&self, drive: &Drive) -> Vec<ObjectPath> {
        let state = self.inner.state.lock().await;
        drive
            .block_devices()
            .iter()
            .filter(|(path, props)| props.is_mounted() || state.mountpoints.contains_key(*path))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Starts an unmount for every mounted block of `drive`.
    ///
    /// Failures are reported per block on the unmount error channel; completion
    /// arrives through the unmount job.
    pub async fn unmount(&self, drive: &Drive) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for path in self.mounted_blocks(drive).await {
            let watcher = self.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = watcher.inner.bus.unmount(&path).await {
                    error!(path = %path, "Unmount failed: {}", e);
                    watcher.publish(|s| s.unmount_errors.clone(), e).await;
                }
            }));
        }
        handles
    }

    /// Wipes `drive` on a detached task: unmount, delete partitions, then format
    /// every partitionable block.
    ///
    /// Stops at the first failure and reports it on the format error channel.
    /// Success is only visible through the mkfs job and the remount that follows.
    pub fn format(&self, drive: &Drive) -> JoinHandle<()> {
        let watcher = self.clone();
        let drive = drive.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.format_drive(&drive).await {
                error!(drive = %drive.path(), "Format failed: {}", e);
                watcher.publish(|s| s.format_errors.clone(), e).await;
            }
        })
    }

    async fn format_drive(&self, drive: &Drive) -> WatchResult<()> {
        let bus = &self.inner.bus;
        for path in self.mounted_blocks(drive).await {
            debug!(path = %path, "Unmounting before format");
            bus.unmount(&path).await?;
        }

        let mut deleted = Vec::new();
        for (path, props) in drive.block_devices() {
            if !props.has_partition() {
                continue;
            }
            debug!(path = %path, "Deleting partition");
            bus.delete_partition(path).await?;
            self.inner.state.lock().await.graph.remove_block(path);
            deleted.push(path);
        }

        for (path, props) in drive.block_devices() {
            if deleted.contains(&path) || !props.is_partitionable() {
                continue;
            }
            info!(path = %path, fs = %self.inner.format_filesystem, "Formatting");
            bus.format(path, &self.inner.format_filesystem).await?;
        }
        Ok(())
    }

    /// Drives with at least one block device and no system block devices.
    pub async fn external_drives(&self) -> Vec<Drive> {
        let _start = self.inner.start_lock.lock().await;
        let state = self.inner.state.lock().await;
        state
            .graph
            .drives()
            .filter(|drive| drive.has_block_devices() && !drive.has_system_block_devices())
            .cloned()
            .collect()
    }

    pub async fn drives(&self) -> Vec<Drive> {
        self.inner.state.lock().await.graph.drives().cloned().collect()
    }

    pub async fn drive(&self, path: &ObjectPath) -> Option<Drive> {
        self.inner.state.lock().await.graph.drive(path).cloned()
    }

    pub async fn mountpoint(&self, path: &ObjectPath) -> Option<String> {
        self.inner.state.lock().await.mountpoints.get(path).cloned()
    }

    pub async fn pending_mounts(&self) -> Vec<ObjectPath> {
        self.inner.state.lock().await.pending_mounts.clone()
    }

    /// Stops every worker and closes every subscriber channel.
    pub async fn shutdown(&self) {
        self.inner.cancellable.cancel();

        let mut runtime = self.inner.runtime.lock().await;
        if let Some(dispatcher) = runtime.dispatcher.as_mut() {
            dispatcher.close().await;
        }
        if let Some(multiplexer) = runtime.multiplexer.take() {
            if let Err(e) = multiplexer.await {
                warn!("Multiplexer ended abnormally: {}", e);
            }
        }
        // The job channels close once the worker sees the dispatcher gone.
        if let Some(jobs) = runtime.jobs.take() {
            jobs.join().await;
        }
        runtime.dispatcher = None;
        drop(runtime);

        *self.subscribers() = Subscribers::default();
        info!("Storage watcher stopped");
    }
}
