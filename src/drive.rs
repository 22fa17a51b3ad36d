use std::collections::BTreeMap;

use crate::event::ObjectPath;
use crate::properties::InterfacesAndProperties;

/// A drive and the block devices attached to it.
///
/// Block devices are keyed by object path in a sorted map so that sweeps over a
/// drive (unmount, format) always visit them in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drive {
    path: ObjectPath,
    block_devices: BTreeMap<ObjectPath, InterfacesAndProperties>,
    drive_info: InterfacesAndProperties,
}

impl Drive {
    pub fn new(path: impl Into<ObjectPath>, drive_info: InterfacesAndProperties) -> Self {
        Self {
            path: path.into(),
            block_devices: BTreeMap::new(),
            drive_info,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Properties of the drive object itself.
    pub fn drive_info(&self) -> &InterfacesAndProperties {
        &self.drive_info
    }

    pub fn block_devices(&self) -> &BTreeMap<ObjectPath, InterfacesAndProperties> {
        &self.block_devices
    }

    pub(crate) fn block_devices_mut(&mut self) -> &mut BTreeMap<ObjectPath, InterfacesAndProperties> {
        &mut self.block_devices
    }

    pub fn block_device(&self, path: &ObjectPath) -> Option<&InterfacesAndProperties> {
        self.block_devices.get(path)
    }

    pub fn has_block_devices(&self) -> bool {
        !self.block_devices.is_empty()
    }

    /// Human readable name: vendor and model when known, otherwise the last
    /// segment of the object path.
    pub fn name(&self) -> String {
        let vendor = self.drive_info.vendor().trim();
        let model = self.drive_info.model().trim();
        let name = match (vendor.is_empty(), model.is_empty()) {
            (false, false) => format!("{} {}", vendor, model),
            (false, true) => vendor.to_string(),
            (true, false) => model.to_string(),
            (true, true) => String::new(),
        };
        if !name.is_empty() {
            return name;
        }
        self.path
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn model(&self) -> &str {
        self.drive_info.model()
    }

    /// Whether any block device carries the `HintSystem` flag.
    pub fn has_system_block_devices(&self) -> bool {
        self.block_devices.values().any(InterfacesAndProperties::is_system)
    }

    /// `None` when the drive does not report `MediaRemovable`.
    pub fn is_media_removable(&self) -> Option<bool> {
        self.drive_info.is_media_removable()
    }
}
