pub mod mount;
pub mod udisks2;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::WatchResult;
use crate::event::{Event, ObjectPath};
use crate::properties::InterfacesAndProperties;

/// Object-manager signals the dispatcher listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusSignal {
    InterfacesAdded,
    InterfacesRemoved,
}

impl BusSignal {
    pub fn member(&self) -> &'static str {
        match self {
            BusSignal::InterfacesAdded => "InterfacesAdded",
            BusSignal::InterfacesRemoved => "InterfacesRemoved",
        }
    }
}

/// Decoded signals; an `Err` item is a payload that could not be decoded.
/// Dropping the stream cancels the subscription.
pub type SignalStream = BoxStream<'static, WatchResult<Event>>;

/// What the watcher needs from the storage service.
///
/// Every state-changing call only reports that the request was accepted; actual
/// completion is observed through job signals.
#[async_trait]
pub trait StorageBus: Send + Sync {
    async fn subscribe(&self, signal: BusSignal) -> WatchResult<SignalStream>;

    /// Full snapshot of every object the service exports.
    async fn managed_objects(&self) -> WatchResult<HashMap<ObjectPath, InterfacesAndProperties>>;

    /// Mounts the filesystem at `path`, returning where it was mounted.
    async fn mount(&self, path: &ObjectPath) -> WatchResult<String>;

    async fn unmount(&self, path: &ObjectPath) -> WatchResult<()>;

    async fn format(&self, path: &ObjectPath, fs_type: &str) -> WatchResult<()>;

    async fn delete_partition(&self, path: &ObjectPath) -> WatchResult<()>;
}

/// Free-space source for mounted filesystems.
pub trait FreeSpace: Send + Sync {
    /// Percentage of blocks still available to unprivileged users.
    fn free_percentage(&self, mountpoint: &Path) -> WatchResult<u64>;
}
