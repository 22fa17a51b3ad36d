//! Application reactor
//!
//! The consumer side of the storage watcher. Three loops, each over a group of
//! complementary channels, turn watcher events into mounts, notifications, the
//! standard directory layout and free-space warnings.

use std::sync::Arc;

use flume::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::FreeSpace;
use crate::cancellable::Cancellable;
use crate::config::Config;
use crate::error::WatchError;
use crate::event::Event;
use crate::job::Job;
use crate::mount::{MountWatch, Mountpoint};
use crate::service::freespace::FreeSpaceWarning;
use crate::service::notifications::{
    Message, Notifier, PushMessage, STORAGE_DETECTED, STORAGE_FAILED, STORAGE_REMOVED,
};
use crate::service::places::create_standard_home_dirs;
use crate::service::storagewatcher::{MountEvent, StorageWatcher};

struct Context {
    watcher: StorageWatcher,
    notifier: Arc<dyn Notifier>,
    watch: Arc<MountWatch>,
    free_space: FreeSpaceWarning,
    config: Config,
}

impl Context {
    fn success(&self, message: Message) -> PushMessage {
        PushMessage::standard(
            &self.config.application,
            message.summary,
            message.body,
            &self.config.success_icon,
        )
    }

    fn failure(&self) -> PushMessage {
        PushMessage::standard(
            &self.config.application,
            STORAGE_FAILED.summary,
            STORAGE_FAILED.body,
            &self.config.error_icon,
        )
    }

    async fn notify(&self, message: Option<PushMessage>) {
        if let Some(message) = message {
            if let Err(e) = self.notifier.send(&message).await {
                warn!("Failed to send notification: {}", e);
            }
        }
    }
}

/// Handle to the running reactor loops.
pub struct Reactor {
    watch: Arc<MountWatch>,
    cancellable: Cancellable,
    loops: Vec<JoinHandle<()>>,
}

impl Reactor {
    /// Subscribes to every watcher channel and starts the loops.
    ///
    /// Call before [`StorageWatcher::init`] so no event is missed. The home mount
    /// point is watched for free space from the start.
    pub fn spawn(
        watcher: &StorageWatcher,
        notifier: Arc<dyn Notifier>,
        free_space: Arc<dyn FreeSpace>,
        config: &Config,
    ) -> Self {
        let watch = Arc::new(MountWatch::with_home(config.home_mountpoint.as_str()));
        let ctx = Arc::new(Context {
            watcher: watcher.clone(),
            notifier: notifier.clone(),
            watch: watch.clone(),
            free_space: FreeSpaceWarning::new(free_space, notifier, watch.clone(), config),
            config: config.clone(),
        });
        let cancellable = Cancellable::new();

        let (added, block_errors) = watcher.subscribe_add_events();
        let mount_removed = watcher.subscribe_remove_events();
        let (mounts, mount_errors) = watcher.subscribe_mount_events();
        let (unmounts, unmount_errors) = watcher.subscribe_unmount_events();
        let (formats, format_errors) = watcher.subscribe_format_events();

        let loops = vec![
            tokio::spawn(block_loop(
                ctx.clone(),
                cancellable.clone(),
                added,
                block_errors,
                mount_removed,
            )),
            tokio::spawn(mount_loop(
                ctx.clone(),
                cancellable.clone(),
                mounts,
                mount_errors,
                unmounts,
                unmount_errors,
            )),
            tokio::spawn(format_loop(ctx, cancellable.clone(), formats, format_errors)),
        ];

        Self {
            watch,
            cancellable,
            loops,
        }
    }

    pub fn mount_watch(&self) -> Arc<MountWatch> {
        self.watch.clone()
    }

    /// Stops the loops. They also stop on their own once the watcher shuts down.
    pub async fn shutdown(self) {
        self.cancellable.cancel();
        for handle in self.loops {
            if let Err(e) = handle.await {
                warn!("Reactor loop ended abnormally: {}", e);
            }
        }
    }
}

async fn block_loop(
    ctx: Arc<Context>,
    cancellable: Cancellable,
    added: Receiver<Event>,
    block_errors: Receiver<WatchError>,
    mount_removed: Receiver<String>,
) {
    info!("Listening for addition and removal events");
    let period = ctx.config.free_space_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            _ = cancellable.cancelled() => break,
            event = added.recv_async() => {
                let Ok(event) = event else { break };
                debug!(path = %event.path, "Mounting added block device");
                ctx.watcher.mount(&event);
                None
            }
            err = block_errors.recv_async() => {
                let Ok(err) = err else { break };
                warn!("Issues in block for added drive: {}", err);
                Some(ctx.failure())
            }
            mountpoint = mount_removed.recv_async() => {
                let Ok(mountpoint) = mountpoint else { break };
                info!(mountpoint = %mountpoint, "Path removed");
                ctx.watch.remove(&Mountpoint::from(mountpoint));
                Some(ctx.success(STORAGE_REMOVED))
            }
            _ = ticker.tick() => {
                ctx.free_space.check_all().await;
                None
            }
        };
        ctx.notify(message).await;
    }
    debug!("Block loop stopped");
}

async fn mount_loop(
    ctx: Arc<Context>,
    cancellable: Cancellable,
    mounts: Receiver<MountEvent>,
    mount_errors: Receiver<WatchError>,
    unmounts: Receiver<String>,
    unmount_errors: Receiver<WatchError>,
) {
    info!("Listening for mount and unmount events");
    loop {
        let message = tokio::select! {
            _ = cancellable.cancelled() => break,
            mounted = mounts.recv_async() => {
                let Ok(mounted) = mounted else { break };
                info!(path = %mounted.path, mountpoint = %mounted.mountpoint, "Mounted");
                let mountpoint = Mountpoint::from(mounted.mountpoint);
                if let Err(e) =
                    create_standard_home_dirs(mountpoint.as_path(), &ctx.config.standard_dirs).await
                {
                    warn!(mountpoint = %mountpoint, "Failed to create standard dir layout: {}", e);
                }
                ctx.watch.set(mountpoint, true);
                Some(ctx.success(STORAGE_DETECTED))
            }
            err = mount_errors.recv_async() => {
                let Ok(err) = err else { break };
                warn!("Error while mounting device: {}", err);
                Some(ctx.failure())
            }
            mountpoint = unmounts.recv_async() => {
                let Ok(mountpoint) = mountpoint else { break };
                info!(mountpoint = %mountpoint, "Path removed");
                ctx.watch.remove(&Mountpoint::from(mountpoint));
                Some(ctx.success(STORAGE_REMOVED))
            }
            err = unmount_errors.recv_async() => {
                let Ok(err) = err else { break };
                warn!("Error while unmounting device: {}", err);
                Some(ctx.failure())
            }
        };
        ctx.notify(message).await;
    }
    debug!("Mount loop stopped");
}

async fn format_loop(
    ctx: Arc<Context>,
    cancellable: Cancellable,
    formats: Receiver<Job>,
    format_errors: Receiver<WatchError>,
) {
    info!("Listening for format events");
    loop {
        let message = tokio::select! {
            _ = cancellable.cancelled() => break,
            job = formats.recv_async() => {
                let Ok(job) = job else { break };
                if job.was_completed {
                    info!(path = %job.path(), operation = job.operation.as_str(), "Format done");
                } else {
                    debug!(path = %job.path(), operation = job.operation.as_str(), "Format started");
                }
                None
            }
            err = format_errors.recv_async() => {
                let Ok(err) = err else { break };
                warn!("There was an error while formatting: {}", err);
                Some(ctx.failure())
            }
        };
        ctx.notify(message).await;
    }
    debug!("Format loop stopped");
}
