// Tests for the push message format

use serde_json::{json, Value};
use storwatch::service::notifications::{STORAGE_DETECTED, STORAGE_REMOVED};
use storwatch::{Card, Notification, PushMessage};

#[test]
fn test_standard_message_json() {
    let message = PushMessage::standard(
        "storwatch",
        STORAGE_DETECTED.summary,
        STORAGE_DETECTED.body,
        "/usr/share/storwatch/icons/storwatch.svg",
    );
    let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

    assert_eq!(
        value,
        json!({
            "notification": {
                "card": {
                    "summary": "Storage device detected",
                    "body": "This device will be scanned for new content",
                    "popup": true,
                    "actions": ["application:///storwatch.desktop"],
                    "icon": "/usr/share/storwatch/icons/storwatch.svg",
                    "persist": true
                }
            }
        })
    );
}

#[test]
fn test_empty_fields_are_omitted() {
    let message = PushMessage {
        notification: Notification {
            card: Some(Card {
                summary: STORAGE_REMOVED.summary.to_string(),
                ..Card::default()
            }),
        },
    };
    assert_eq!(
        message.to_json().unwrap(),
        r#"{"notification":{"card":{"summary":"Storage device has been removed"}}}"#
    );

    assert_eq!(
        PushMessage::default().to_json().unwrap(),
        r#"{"notification":{}}"#
    );
}

#[test]
fn test_message_parses_back() {
    let parsed: PushMessage =
        serde_json::from_str(r#"{"notification":{"card":{"summary":"Hi","popup":true}}}"#).unwrap();
    let card = parsed.card().unwrap();
    assert_eq!(card.summary, "Hi");
    assert!(card.popup);
    assert!(!card.persist);
    assert!(card.actions.is_empty());
}
