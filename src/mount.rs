use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A filesystem mount point as reported by UDisks2.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mountpoint(String);

impl Mountpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Whether the mount point lives under `prefix` (e.g. `/media`).
    pub fn is_external(&self, prefix: &str) -> bool {
        self.as_path().starts_with(prefix)
    }
}

impl fmt::Display for Mountpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Mountpoint {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for Mountpoint {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl AsRef<Path> for Mountpoint {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

/// Mount points checked for free space, each with its warn flag.
///
/// A set flag means a low-space warning may still be sent for that mount point.
/// Shared between the reactor loops through an `Arc`.
#[derive(Debug, Default)]
pub struct MountWatch {
    mountpoints: Mutex<HashMap<Mountpoint, bool>>,
}

impl MountWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch seeded with `home`, armed.
    pub fn with_home(home: impl Into<Mountpoint>) -> Self {
        let watch = Self::new();
        watch.set(home, true);
        watch
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Mountpoint, bool>> {
        // The map stays consistent even if a holder panicked.
        self.mountpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, mountpoint: impl Into<Mountpoint>, warn: bool) {
        self.lock().insert(mountpoint.into(), warn);
    }

    /// Unknown mount points never warn.
    pub fn warn(&self, mountpoint: &Mountpoint) -> bool {
        self.lock().get(mountpoint).copied().unwrap_or(false)
    }

    pub fn remove(&self, mountpoint: &Mountpoint) -> bool {
        self.lock().remove(mountpoint).is_some()
    }

    pub fn contains(&self, mountpoint: &Mountpoint) -> bool {
        self.lock().contains_key(mountpoint)
    }

    /// Snapshot of the watched mount points, sorted.
    pub fn mountpoints(&self) -> Vec<Mountpoint> {
        let mut mountpoints: Vec<Mountpoint> = self.lock().keys().cloned().collect();
        mountpoints.sort();
        mountpoints
    }
}
