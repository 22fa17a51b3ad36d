//! Device graph
//!
//! Drives keyed by object path, each holding the block devices that point back at
//! it. The graph itself does no locking; the storage watcher owns it behind its
//! graph lock.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::drive::Drive;
use crate::error::{WatchError, WatchResult};
use crate::event::{Event, ObjectKind, ObjectPath};
use crate::properties::{InterfacesAndProperties, BLOCK_INTERFACE};

/// Where an addition ended up in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Drive,
    Block { drive: ObjectPath },
    Unhandled,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceGraph {
    drives: BTreeMap<ObjectPath, Drive>,
}

impl DeviceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an addition to the graph.
    ///
    /// A drive addition replaces any drive already recorded at that path. A block
    /// addition attaches through the `Drive` back-reference; an addition for a known
    /// block that lacks the reference is merged into the recorded entry. Failing to
    /// resolve the drive is a consistency error and leaves the graph untouched.
    pub fn add_interface(&mut self, event: &Event) -> WatchResult<Attachment> {
        match event.path.kind() {
            ObjectKind::Drive => {
                if self.drives.contains_key(&event.path) {
                    warn!(path = %event.path, "Replacing drive with new drive event");
                }
                self.drives.insert(
                    event.path.clone(),
                    Drive::new(event.path.clone(), event.props.clone()),
                );
                Ok(Attachment::Drive)
            }
            ObjectKind::Block => self.attach_block(event),
            ObjectKind::Job | ObjectKind::Unhandled => {
                debug!(path = %event.path, "Unhandled object path");
                Ok(Attachment::Unhandled)
            }
        }
    }

    fn attach_block(&mut self, event: &Event) -> WatchResult<Attachment> {
        if let Some(drive_path) = event.props.drive_path() {
            let drive_path = ObjectPath::from(drive_path);
            let drive = self.drives.get_mut(&drive_path).ok_or_else(|| {
                WatchError::Consistency(format!(
                    "drive {} holding block device {} is not mapped",
                    drive_path, event.path
                ))
            })?;
            drive
                .block_devices_mut()
                .insert(event.path.clone(), event.props.clone());
            return Ok(Attachment::Block { drive: drive_path });
        }

        // Later additions only carry the interfaces that were added.
        let drive = self
            .drives
            .values_mut()
            .find(|drive| drive.block_devices().contains_key(&event.path))
            .ok_or_else(|| {
                WatchError::Consistency(format!(
                    "block device {} has no drive reference",
                    event.path
                ))
            })?;
        if let Some(props) = drive.block_devices_mut().get_mut(&event.path) {
            props.merge(event.props.clone());
        }
        Ok(Attachment::Block {
            drive: drive.path().clone(),
        })
    }

    pub fn remove_drive(&mut self, path: &ObjectPath) -> Option<Drive> {
        self.drives.remove(path)
    }

    /// Removes a block device outright, e.g. after its partition was deleted.
    pub fn remove_block(&mut self, path: &ObjectPath) -> Option<InterfacesAndProperties> {
        self.drives
            .values_mut()
            .find_map(|drive| drive.block_devices_mut().remove(path))
    }

    /// Strips lost interfaces from a block device. The entry goes away when the
    /// block interface itself is lost or nothing is left. Returns true if it did.
    pub fn remove_block_interfaces(&mut self, path: &ObjectPath, interfaces: &[String]) -> bool {
        for drive in self.drives.values_mut() {
            let blocks = drive.block_devices_mut();
            let Some(props) = blocks.get_mut(path) else {
                continue;
            };
            for interface in interfaces {
                props.remove_interface(interface);
            }
            let gone = interfaces.iter().any(|i| i == BLOCK_INTERFACE) || props.is_empty();
            if gone {
                blocks.remove(path);
            }
            return gone;
        }
        false
    }

    pub fn drive(&self, path: &ObjectPath) -> Option<&Drive> {
        self.drives.get(path)
    }

    pub fn drive_for_block(&self, block: &ObjectPath) -> Option<&Drive> {
        self.drives
            .values()
            .find(|drive| drive.block_devices().contains_key(block))
    }

    pub fn block(&self, path: &ObjectPath) -> Option<&InterfacesAndProperties> {
        self.drive_for_block(path)?.block_device(path)
    }

    /// Drives in path order.
    pub fn drives(&self) -> impl Iterator<Item = &Drive> {
        self.drives.values()
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Mount-eligibility policy for a block addition.
    ///
    /// `supported` must be sorted. Returns `Ok(false)` for silent rejections and
    /// [`WatchError::UnhandledFileSystem`] for a present filesystem that is not in
    /// the allow-list.
    pub fn desired_mountable_event(&self, event: &Event, supported: &[String]) -> WatchResult<bool> {
        if !event.props.is_filesystem() {
            return Ok(false);
        }

        let drive = match event.props.drive_path() {
            Some(path) => self.drives.get(&ObjectPath::from(path)),
            None => self.drive_for_block(&event.path),
        };
        let Some(drive) = drive else {
            debug!(path = %event.path, "Drive for block device not found");
            return Ok(false);
        };

        if drive.has_system_block_devices() {
            debug!(drive = %drive.path(), "Drive holds system block devices");
            return Ok(false);
        }
        if drive.is_media_removable() != Some(true) {
            debug!(drive = %drive.path(), "Drive media is not removable");
            return Ok(false);
        }

        // Type changes are not signalled as interface additions, so only the
        // event's own Block interface describes the current filesystem.
        if !event.props.has_interface(BLOCK_INTERFACE) {
            debug!(path = %event.path, "Addition without a block interface");
            return Ok(false);
        }
        if event.props.is_mounted() {
            return Ok(false);
        }

        let fs_type = match event.props.id_type() {
            Some(fs_type) if !fs_type.is_empty() => fs_type,
            _ => return Ok(false),
        };
        if supported
            .binary_search_by(|supported| supported.as_str().cmp(fs_type))
            .is_err()
        {
            return Err(WatchError::UnhandledFileSystem(fs_type.to_string()));
        }
        Ok(true)
    }
}
