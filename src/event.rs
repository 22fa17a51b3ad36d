//! Raw bus events and object-path classification.

use std::fmt;

use crate::properties::InterfacesAndProperties;

pub const JOBS_PREFIX: &str = "/org/freedesktop/UDisks2/jobs/";
pub const DRIVES_PREFIX: &str = "/org/freedesktop/UDisks2/drives/";
pub const BLOCK_DEVICES_PREFIX: &str = "/org/freedesktop/UDisks2/block_devices/";

/// Namespace an object path lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Job,
    Drive,
    Block,
    Unhandled,
}

/// A bus object path, unique per object.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ObjectKind {
        if self.0.starts_with(JOBS_PREFIX) {
            ObjectKind::Job
        } else if self.0.starts_with(DRIVES_PREFIX) {
            ObjectKind::Drive
        } else if self.0.starts_with(BLOCK_DEVICES_PREFIX) {
            ObjectKind::Block
        } else {
            ObjectKind::Unhandled
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for ObjectPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One `InterfacesAdded` or `InterfacesRemoved` signal.
///
/// Additions carry a property bag; removals carry the sorted list of interfaces
/// the object lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub path: ObjectPath,
    pub props: InterfacesAndProperties,
    pub interfaces: Vec<String>,
}

impl Event {
    pub fn addition(path: impl Into<ObjectPath>, props: InterfacesAndProperties) -> Self {
        Self {
            path: path.into(),
            props,
            interfaces: Vec::new(),
        }
    }

    pub fn removal<I, S>(path: impl Into<ObjectPath>, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut event = Self {
            path: path.into(),
            props: InterfacesAndProperties::new(),
            interfaces: interfaces.into_iter().map(Into::into).collect(),
        };
        event.sort_interfaces();
        event
    }

    pub fn is_removal_event(&self) -> bool {
        !self.interfaces.is_empty()
    }

    pub fn sort_interfaces(&mut self) {
        self.interfaces.sort_unstable();
    }

    /// Whether `interface` is among the lost interfaces. Relies on the list being
    /// sorted.
    pub fn lost_interface(&self, interface: &str) -> bool {
        self.interfaces
            .binary_search_by(|lost| lost.as_str().cmp(interface))
            .is_ok()
    }
}
