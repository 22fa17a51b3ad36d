//! User-facing notifications
//!
//! Push messages are JSON documents handed to the Postal service on the session
//! bus, which turns them into notification bubbles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zbus::Connection;

use crate::error::{WatchError, WatchResult};

const POSTAL_SERVICE: &str = "com.ubuntu.Postal";
const POSTAL_INTERFACE: &str = "com.ubuntu.Postal";
const POSTAL_PATH_PREFIX: &str = "/com/ubuntu/Postal/";
const POST_METHOD: &str = "Post";

/// Summary and body of a fixed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub summary: &'static str,
    pub body: &'static str,
}

pub const STORAGE_DETECTED: Message = Message {
    summary: "Storage device detected",
    body: "This device will be scanned for new content",
};

pub const STORAGE_FAILED: Message = Message {
    summary: "Failed to add storage device",
    body: "Make sure the storage device is correctly formated",
};

pub const STORAGE_REMOVED: Message = Message {
    summary: "Storage device has been removed",
    body: "Content previously available on this device will no longer be accessible",
};

pub const LOW_SPACE_SUMMARY: &str = "Low on disk space";

/// Anything that can deliver a push message to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &PushMessage) -> WatchResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: Notification,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
}

/// The visible part of a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Required; the card is not shown without it.
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// Show a bubble.
    #[serde(default, skip_serializing_if = "is_false")]
    pub popup: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    /// Keep the card in the notification centre.
    #[serde(default, skip_serializing_if = "is_false")]
    pub persist: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PushMessage {
    /// Popup card that persists and opens `application` when activated.
    pub fn standard(application: &str, summary: &str, body: &str, icon: &str) -> Self {
        Self {
            notification: Notification {
                card: Some(Card {
                    summary: summary.to_string(),
                    body: body.to_string(),
                    popup: true,
                    actions: vec![format!("application:///{}.desktop", application)],
                    icon: icon.to_string(),
                    persist: true,
                }),
            },
        }
    }

    pub fn card(&self) -> Option<&Card> {
        self.notification.card.as_ref()
    }

    pub fn to_json(&self) -> WatchResult<String> {
        serde_json::to_string(self)
            .map_err(|e| WatchError::Notification(format!("cannot encode push message: {}", e)))
    }
}

/// Posts push messages to `com.ubuntu.Postal`.
pub struct PostalNotifier {
    connection: Connection,
    application: String,
}

impl PostalNotifier {
    pub fn new(connection: Connection, application: impl Into<String>) -> Self {
        Self {
            connection,
            application: application.into(),
        }
    }

    /// Connects to the session bus.
    pub async fn session(application: impl Into<String>) -> WatchResult<Self> {
        let connection = Connection::session()
            .await
            .map_err(|e| WatchError::Bus(format!("Failed to connect to session D-Bus: {}", e)))?;
        Ok(Self::new(connection, application))
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    fn object_path(&self) -> String {
        format!("{}{}", POSTAL_PATH_PREFIX, self.application)
    }
}

#[async_trait]
impl Notifier for PostalNotifier {
    async fn send(&self, message: &PushMessage) -> WatchResult<()> {
        let payload = message.to_json()?;
        let proxy = zbus::Proxy::new(
            &self.connection,
            POSTAL_SERVICE,
            self.object_path(),
            POSTAL_INTERFACE,
        )
        .await
        .map_err(|e| WatchError::Notification(format!("cannot reach Postal: {}", e)))?;

        proxy
            .call_method(POST_METHOD, &(self.application.as_str(), payload.as_str()))
            .await
            .map_err(|e| WatchError::Notification(format!("Post failed: {}", e)))?;
        debug!(application = %self.application, "Notification posted");
        Ok(())
    }
}
