//! UDisks2 backend implementation
//!
//! Talks to UDisks2 over the system D-Bus and turns its object-manager signals and
//! method replies into the crate's property bags.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, Message};

use crate::backend::{BusSignal, SignalStream, StorageBus};
use crate::error::{WatchError, WatchResult};
use crate::event::{Event, ObjectPath};
use crate::properties::{
    InterfacesAndProperties, PropertyValue, VariantMap, BLOCK_INTERFACE, FILESYSTEM_INTERFACE,
    OBJECT_MANAGER_INTERFACE, PARTITION_INTERFACE, UDISKS2_PATH, UDISKS2_SERVICE,
};

type RawProperties = HashMap<String, HashMap<String, OwnedValue>>;

/// UDisks2 over zbus
pub struct UDisks2Bus {
    connection: Arc<Connection>,
}

impl UDisks2Bus {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    /// Connects to the system bus
    pub async fn system() -> WatchResult<Self> {
        let connection = Connection::system()
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to connect to system D-Bus: {}", e)))?;
        Ok(Self::new(connection))
    }

    async fn object_manager(&self) -> WatchResult<zbus::Proxy<'static>> {
        zbus::Proxy::new(
            &self.connection,
            UDISKS2_SERVICE,
            UDISKS2_PATH,
            OBJECT_MANAGER_INTERFACE,
        )
        .await
        .map_err(|e| WatchError::Bus(format!("Failed to get UDisks2 object manager: {}", e)))
    }

    async fn proxy(
        &self,
        path: &ObjectPath,
        interface: &'static str,
    ) -> WatchResult<zbus::Proxy<'static>> {
        let path_obj = zvariant::ObjectPath::try_from(path.as_str().to_owned())
            .map_err(|e| WatchError::Bus(format!("Invalid object path {}: {}", path, e)))?;
        zbus::Proxy::new(&self.connection, UDISKS2_SERVICE, path_obj, interface)
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to create {} proxy: {}", interface, e)))
    }
}

fn no_interaction_options() -> HashMap<&'static str, Value<'static>> {
    let mut options = HashMap::new();
    options.insert("auth.no_user_interaction", Value::from(true));
    options
}

#[async_trait]
impl StorageBus for UDisks2Bus {
    async fn subscribe(&self, signal: BusSignal) -> WatchResult<SignalStream> {
        let manager = self
            .object_manager()
            .await
            .map_err(|e| WatchError::subscription(signal.member(), e))?;
        let stream = manager
            .receive_signal(signal.member())
            .await
            .map_err(|e| WatchError::subscription(signal.member(), e))?;

        let decoded = match signal {
            BusSignal::InterfacesAdded => stream.map(|msg| decode_added(&msg)).boxed(),
            BusSignal::InterfacesRemoved => stream.map(|msg| decode_removed(&msg)).boxed(),
        };
        Ok(decoded)
    }

    async fn managed_objects(&self) -> WatchResult<HashMap<ObjectPath, InterfacesAndProperties>> {
        let manager = self.object_manager().await?;

        // GetManagedObjects returns a{oa{sa{sv}}}
        let reply = manager
            .call_method("GetManagedObjects", &())
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to get managed objects: {}", e)))?;

        let body = reply.body();
        let objects: HashMap<OwnedObjectPath, RawProperties> = body
            .deserialize()
            .map_err(|e| WatchError::Decode(format!("Failed to parse managed objects: {}", e)))?;

        Ok(objects
            .into_iter()
            .map(|(path, interfaces)| (ObjectPath::from(path.as_str()), property_bag(interfaces)))
            .collect())
    }

    async fn mount(&self, path: &ObjectPath) -> WatchResult<String> {
        let proxy = self.proxy(path, FILESYSTEM_INTERFACE).await?;
        let mountpoint: String = proxy
            .call("Mount", &(no_interaction_options(),))
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to mount {}: {}", path, e)))?;
        Ok(mountpoint)
    }

    async fn unmount(&self, path: &ObjectPath) -> WatchResult<()> {
        let proxy = self.proxy(path, FILESYSTEM_INTERFACE).await?;
        proxy
            .call_method("Unmount", &(no_interaction_options(),))
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to unmount {}: {}", path, e)))?;
        Ok(())
    }

    async fn format(&self, path: &ObjectPath, fs_type: &str) -> WatchResult<()> {
        let proxy = self.proxy(path, BLOCK_INTERFACE).await?;
        proxy
            .call_method("Format", &(fs_type, no_interaction_options()))
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to format {}: {}", path, e)))?;
        Ok(())
    }

    async fn delete_partition(&self, path: &ObjectPath) -> WatchResult<()> {
        let proxy = self.proxy(path, PARTITION_INTERFACE).await?;
        proxy
            .call_method("Delete", &(no_interaction_options(),))
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to delete partition {}: {}", path, e)))?;
        Ok(())
    }
}

fn decode_added(msg: &Message) -> WatchResult<Event> {
    let body = msg.body();
    let (path, interfaces): (OwnedObjectPath, RawProperties) = body
        .deserialize()
        .map_err(|e| WatchError::Decode(format!("InterfacesAdded: {}", e)))?;
    Ok(Event::addition(path.as_str(), property_bag(interfaces)))
}

fn decode_removed(msg: &Message) -> WatchResult<Event> {
    let body = msg.body();
    let (path, interfaces): (OwnedObjectPath, Vec<String>) = body
        .deserialize()
        .map_err(|e| WatchError::Decode(format!("InterfacesRemoved: {}", e)))?;
    Ok(Event::removal(path.as_str(), interfaces))
}

fn property_bag(interfaces: RawProperties) -> InterfacesAndProperties {
    interfaces
        .into_iter()
        .map(|(interface, properties)| {
            let properties: VariantMap = properties
                .iter()
                .map(|(name, value)| (name.clone(), property_value(value)))
                .collect();
            (interface, properties)
        })
        .collect()
}

fn property_value(value: &Value<'_>) -> PropertyValue {
    match value {
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Str(s) => PropertyValue::Str(s.to_string()),
        Value::ObjectPath(p) => PropertyValue::Str(p.to_string()),
        Value::Value(inner) => property_value(inner),
        Value::Array(array) => {
            if array.element_signature().as_str() == "y" {
                return PropertyValue::Str(bytestring(array));
            }
            let mut items = Vec::new();
            for item in array.iter() {
                match item {
                    Value::Str(s) => items.push(s.to_string()),
                    Value::ObjectPath(p) => items.push(p.to_string()),
                    Value::Array(bytes) => items.push(bytestring(bytes)),
                    _ => return PropertyValue::Other,
                }
            }
            PropertyValue::StrList(items)
        }
        _ => PropertyValue::Other,
    }
}

// UDisks2 hands out paths as NUL terminated byte arrays (`ay`)
fn bytestring(array: &zvariant::Array<'_>) -> String {
    let bytes: Vec<u8> = array
        .iter()
        .filter_map(|b| {
            if let Value::U8(byte) = b {
                Some(*byte)
            } else {
                None
            }
        })
        .take_while(|b| *b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
