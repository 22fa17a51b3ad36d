//! # storwatch - removable storage watcher
//!
//! Watches the UDisks2 storage service for drives coming and going, auto-mounts
//! the filesystems it is allowed to, and tells the user about it.
//!
//! ## Overview
//!
//! UDisks2 reports everything as objects gaining and losing interfaces. storwatch
//! classifies those signals, correlates the start and end of long running jobs
//! (format, mount, unmount) and fans the results out over unbuffered channels, so a
//! slow consumer only holds back its own kind of event.
//!
//! ## Core Concepts
//!
//! - **Property bag**: typed, non-panicking queries over bus properties
//! - **Dispatcher**: routes raw signals to jobs, additions and removals
//! - **Job manager**: pairs job start and completion signals
//! - **Storage watcher**: device graph, mount points and the mount/unmount/format operations
//! - **Reactor**: consumer loops sending notifications and free-space warnings
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storwatch::{Config, StorageWatcher, UDisks2Bus};
//!
//! # async fn example() -> storwatch::WatchResult<()> {
//! let config = Config::load(None)?;
//! let bus = Arc::new(UDisks2Bus::system().await?);
//! let watcher = StorageWatcher::new(bus, &config);
//!
//! let (added, _errors) = watcher.subscribe_add_events();
//! watcher.init().await?;
//!
//! while let Ok(event) = added.recv_async().await {
//!     watcher.mount(&event);
//! }
//! watcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cancellable;
pub mod config;
pub mod dispatcher;
pub mod drive;
pub mod error;
pub mod event;
pub mod job;
pub mod model;
pub mod mount;
pub mod properties;
pub mod service;

pub use backend::mount::StatvfsFreeSpace;
pub use backend::udisks2::UDisks2Bus;
pub use backend::{BusSignal, FreeSpace, SignalStream, StorageBus};
pub use cancellable::Cancellable;
pub use config::Config;
pub use dispatcher::{route, Dispatcher, Route};
pub use drive::Drive;
pub use error::{WatchError, WatchResult};
pub use event::{Event, ObjectKind, ObjectPath};
pub use job::{IgnoreReason, Job, JobManager, JobOperation, JobTracker, JobUpdate};
pub use model::devices::{Attachment, DeviceGraph};
pub use mount::{MountWatch, Mountpoint};
pub use properties::{InterfacesAndProperties, PropertyValue, VariantMap};
pub use service::freespace::FreeSpaceWarning;
pub use service::notifications::{Card, Notification, Notifier, PostalNotifier, PushMessage};
pub use service::places::create_standard_home_dirs;
pub use service::reactor::Reactor;
pub use service::storagewatcher::{
    AddOutcome, Mountability, MountEvent, RemoveOutcome, StorageWatcher,
};
