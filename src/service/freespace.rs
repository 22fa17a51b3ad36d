//! Low disk space warnings
//!
//! Each watched mount point warns once when its free space drops to the threshold
//! and is re-armed once it climbs back above it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::FreeSpace;
use crate::config::Config;
use crate::error::WatchResult;
use crate::mount::{MountWatch, Mountpoint};
use crate::service::notifications::{Notifier, PushMessage, LOW_SPACE_SUMMARY};

pub struct FreeSpaceWarning {
    free_space: Arc<dyn FreeSpace>,
    notifier: Arc<dyn Notifier>,
    watch: Arc<MountWatch>,
    threshold: u64,
    application: String,
    icon: String,
    external_prefix: String,
}

impl FreeSpaceWarning {
    pub fn new(
        free_space: Arc<dyn FreeSpace>,
        notifier: Arc<dyn Notifier>,
        watch: Arc<MountWatch>,
        config: &Config,
    ) -> Self {
        Self {
            free_space,
            notifier,
            watch,
            threshold: config.free_space_threshold,
            application: config.application.clone(),
            icon: config.error_icon.clone(),
            external_prefix: config.external_prefix.clone(),
        }
    }

    pub fn body(&self, mountpoint: &Mountpoint, available: u64) -> String {
        let location = if mountpoint.is_external(&self.external_prefix) {
            "external"
        } else {
            "internal"
        };
        format!(
            "Only {}% is available on the {} storage device",
            available, location
        )
    }

    /// Checks one mount point, returning whether a warning was sent.
    pub async fn check(&self, mountpoint: &Mountpoint) -> WatchResult<bool> {
        let available = self.free_space.free_percentage(mountpoint.as_path())?;

        let mut sent = false;
        if available <= self.threshold && self.watch.warn(mountpoint) {
            info!(mountpoint = %mountpoint, available, "Warning about low free space");
            let message = PushMessage::standard(
                &self.application,
                LOW_SPACE_SUMMARY,
                &self.body(mountpoint, available),
                &self.icon,
            );
            self.notifier.send(&message).await?;
            self.watch.set(mountpoint.clone(), false);
            sent = true;
        }

        // Re-arm, unless the mount point stopped being watched meanwhile.
        if available > self.threshold && self.watch.contains(mountpoint) {
            self.watch.set(mountpoint.clone(), true);
        }
        Ok(sent)
    }

    /// Checks every watched mount point; failures are logged.
    pub async fn check_all(&self) -> usize {
        let mut sent = 0;
        for mountpoint in self.watch.mountpoints() {
            match self.check(&mountpoint).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => warn!(mountpoint = %mountpoint, "Error while querying free space: {}", e),
            }
        }
        sent
    }
}
