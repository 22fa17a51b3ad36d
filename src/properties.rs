//! Property bag
//!
//! Typed accessors over the nested `interface -> property -> value` maps UDisks2
//! attaches to every object. The bus delivers partially populated bags, so every
//! query degrades to `false`, an empty value or `None` instead of failing.

use std::collections::HashMap;

/// UDisks2 D-Bus service name
pub const UDISKS2_SERVICE: &str = "org.freedesktop.UDisks2";
/// Root object exporting the object manager
pub const UDISKS2_PATH: &str = "/org/freedesktop/UDisks2";

pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const BLOCK_INTERFACE: &str = "org.freedesktop.UDisks2.Block";
pub const DRIVE_INTERFACE: &str = "org.freedesktop.UDisks2.Drive";
pub const FILESYSTEM_INTERFACE: &str = "org.freedesktop.UDisks2.Filesystem";
pub const PARTITION_INTERFACE: &str = "org.freedesktop.UDisks2.Partition";
pub const PARTITION_TABLE_INTERFACE: &str = "org.freedesktop.UDisks2.PartitionTable";
pub const JOB_INTERFACE: &str = "org.freedesktop.UDisks2.Job";

pub const FORMAT_ERASE: &str = "format-erase";
pub const FORMAT_MKFS: &str = "format-mkfs";
pub const UNMOUNT_FS: &str = "filesystem-unmount";
pub const MOUNT_FS: &str = "filesystem-mount";

const MOUNT_POINTS_PROPERTY: &str = "MountPoints";
const UUID_PROPERTY: &str = "UUID";
const TABLE_PROPERTY: &str = "Table";
const PARTITIONABLE_PROPERTY: &str = "HintPartitionable";
const SYSTEM_PROPERTY: &str = "HintSystem";
const OPERATION_PROPERTY: &str = "Operation";
const OBJECTS_PROPERTY: &str = "Objects";
const DRIVE_PROPERTY: &str = "Drive";
const ID_TYPE_PROPERTY: &str = "IdType";
const MEDIA_REMOVABLE_PROPERTY: &str = "MediaRemovable";
const MODEL_PROPERTY: &str = "Model";
const VENDOR_PROPERTY: &str = "Vendor";

/// A single bus property value.
///
/// Object paths and bytestrings are carried as strings, arrays of either as
/// string lists. Anything else is kept as `Other` so that mistyped properties can
/// be told apart from missing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Str(String),
    StrList(Vec<String>),
    Other,
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(list) => Some(list),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::StrList(value)
    }
}

impl From<&[&str]> for PropertyValue {
    fn from(value: &[&str]) -> Self {
        PropertyValue::StrList(value.iter().map(|s| s.to_string()).collect())
    }
}

pub type VariantMap = HashMap<String, PropertyValue>;

/// Interfaces exported by a bus object, each with its properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfacesAndProperties(HashMap<String, VariantMap>);

impl InterfacesAndProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper: sets `property` on `interface`, creating the interface.
    pub fn with(
        mut self,
        interface: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.insert(interface, property, value);
        self
    }

    /// Builder-style helper: exports `interface` with no properties.
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.0.entry(interface.to_string()).or_default();
        self
    }

    pub fn insert(&mut self, interface: &str, property: &str, value: impl Into<PropertyValue>) {
        self.0
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), value.into());
    }

    pub fn insert_interface(&mut self, interface: impl Into<String>, properties: VariantMap) {
        self.0.insert(interface.into(), properties);
    }

    pub fn remove_interface(&mut self, interface: &str) -> Option<VariantMap> {
        self.0.remove(interface)
    }

    /// Overlays every interface of `other` onto `self`.
    pub fn merge(&mut self, other: InterfacesAndProperties) {
        self.0.extend(other.0);
    }

    pub fn interface(&self, interface: &str) -> Option<&VariantMap> {
        self.0.get(interface)
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.0.contains_key(interface)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, interface: &str, property: &str) -> Option<&PropertyValue> {
        self.0.get(interface)?.get(property)
    }

    fn get_bool(&self, interface: &str, property: &str) -> Option<bool> {
        self.get(interface, property)?.as_bool()
    }

    fn get_str(&self, interface: &str, property: &str) -> Option<&str> {
        self.get(interface, property)?.as_str()
    }

    /// True when the filesystem reports at least one mount point.
    pub fn is_mounted(&self) -> bool {
        self.get(FILESYSTEM_INTERFACE, MOUNT_POINTS_PROPERTY)
            .and_then(PropertyValue::as_str_list)
            .map(|mount_points| !mount_points.is_empty())
            .unwrap_or(false)
    }

    pub fn mount_points(&self) -> Vec<String> {
        self.get(FILESYSTEM_INTERFACE, MOUNT_POINTS_PROPERTY)
            .and_then(PropertyValue::as_str_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Presence of `UUID` and `Table` on the partition interface; values are not
    /// inspected.
    pub fn has_partition(&self) -> bool {
        match self.interface(PARTITION_INTERFACE) {
            Some(partition) => {
                partition.contains_key(UUID_PROPERTY) && partition.contains_key(TABLE_PROPERTY)
            }
            None => false,
        }
    }

    pub fn is_partitionable(&self) -> bool {
        self.get_bool(BLOCK_INTERFACE, PARTITIONABLE_PROPERTY)
            .unwrap_or(false)
    }

    pub fn is_system(&self) -> bool {
        self.get_bool(BLOCK_INTERFACE, SYSTEM_PROPERTY).unwrap_or(false)
    }

    pub fn job_operation(&self) -> &str {
        self.get_str(JOB_INTERFACE, OPERATION_PROPERTY).unwrap_or("")
    }

    pub fn is_erase_format_job(&self) -> bool {
        self.job_operation() == FORMAT_ERASE
    }

    pub fn is_mkfs_format_job(&self) -> bool {
        self.job_operation() == FORMAT_MKFS
    }

    pub fn is_unmount_job(&self) -> bool {
        self.job_operation() == UNMOUNT_FS
    }

    pub fn is_mount_job(&self) -> bool {
        self.job_operation() == MOUNT_FS
    }

    /// Objects touched by a mkfs, unmount or mount job, in bus order.
    pub fn get_formatted_paths(&self) -> Vec<String> {
        match self.job_operation() {
            FORMAT_MKFS | UNMOUNT_FS | MOUNT_FS => self
                .get(JOB_INTERFACE, OBJECTS_PROPERTY)
                .and_then(PropertyValue::as_str_list)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn is_filesystem(&self) -> bool {
        self.has_interface(FILESYSTEM_INTERFACE)
    }

    /// The drive a block device belongs to, from its `Drive` back-reference.
    pub fn drive_path(&self) -> Option<&str> {
        self.get_str(BLOCK_INTERFACE, DRIVE_PROPERTY)
    }

    pub fn id_type(&self) -> Option<&str> {
        self.get_str(BLOCK_INTERFACE, ID_TYPE_PROPERTY)
    }

    /// `None` when the drive does not export `MediaRemovable` at all.
    pub fn is_media_removable(&self) -> Option<bool> {
        self.get_bool(DRIVE_INTERFACE, MEDIA_REMOVABLE_PROPERTY)
    }

    pub fn model(&self) -> &str {
        self.get_str(DRIVE_INTERFACE, MODEL_PROPERTY).unwrap_or("")
    }

    pub fn vendor(&self) -> &str {
        self.get_str(DRIVE_INTERFACE, VENDOR_PROPERTY).unwrap_or("")
    }
}

impl FromIterator<(String, VariantMap)> for InterfacesAndProperties {
    fn from_iter<T: IntoIterator<Item = (String, VariantMap)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
