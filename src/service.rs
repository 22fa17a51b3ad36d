//! Services built on top of the storage bus
//!
//! - StorageWatcher: device graph, auto-mount bookkeeping and subscriber channels
//! - Reactor: consumer loops reacting to watcher events
//! - Notifications, standard directory layout and free-space warnings

pub mod freespace;
pub mod notifications;
pub mod places;
pub mod reactor;
pub mod storagewatcher;
