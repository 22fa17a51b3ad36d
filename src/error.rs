//! Error types shared by the dispatcher, job manager and storage watcher.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while watching storage devices.
///
/// Per-event problems (`Decode`, `Consistency`) are logged by the caller and the
/// event is dropped; operation failures (`Bus`) travel on the matching error
/// channel of the [`StorageWatcher`](crate::StorageWatcher).
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to subscribe to {signal}: {reason}")]
    Subscription { signal: String, reason: String },

    #[error("malformed signal payload: {0}")]
    Decode(String),

    #[error("bus call failed: {0}")]
    Bus(String),

    /// A present filesystem that is not in the supported allow-list.
    #[error("unhandled filesystem: {0}")]
    UnhandledFileSystem(String),

    #[error("inconsistent device state: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

impl WatchError {
    pub fn subscription(signal: impl Into<String>, reason: impl ToString) -> Self {
        Self::Subscription {
            signal: signal.into(),
            reason: reason.to_string(),
        }
    }

    /// True for the one policy rejection that is reported to the user.
    pub fn is_unhandled_filesystem(&self) -> bool {
        matches!(self, Self::UnhandledFileSystem(_))
    }
}

impl From<zbus::Error> for WatchError {
    fn from(err: zbus::Error) -> Self {
        WatchError::Bus(err.to_string())
    }
}

impl From<toml::de::Error> for WatchError {
    fn from(err: toml::de::Error) -> Self {
        WatchError::Config(err.to_string())
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
