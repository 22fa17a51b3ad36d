// Tests for low disk space warnings and the mount watch

mod common;

use std::path::Path;
use std::sync::Arc;

use common::*;
use storwatch::{
    Config, FreeSpace, FreeSpaceWarning, MountWatch, Mountpoint, StatvfsFreeSpace, WatchError,
};

const USB: &str = "/media/phablet/sdb1";

fn setup() -> (Arc<FixedFreeSpace>, Arc<RecordingNotifier>, Arc<MountWatch>, FreeSpaceWarning) {
    let free_space = Arc::new(FixedFreeSpace::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let watch = Arc::new(MountWatch::with_home("/home"));
    let warning = FreeSpaceWarning::new(
        free_space.clone(),
        notifier.clone(),
        watch.clone(),
        &Config::default(),
    );
    (free_space, notifier, watch, warning)
}

#[tokio::test]
async fn test_warns_once_until_rearmed() {
    let (free_space, notifier, watch, warning) = setup();
    let home = Mountpoint::from("/home");

    free_space.set("/home", 4);
    assert!(warning.check(&home).await.unwrap());
    assert!(!watch.warn(&home));

    let message = notifier.next().await;
    let card = message.card().unwrap();
    assert_eq!(card.summary, "Low on disk space");
    assert_eq!(card.body, "Only 4% is available on the internal storage device");
    assert_eq!(card.icon, "error");

    // Still low: no second warning
    free_space.set("/home", 3);
    assert!(!warning.check(&home).await.unwrap());

    // Recovered: re-armed
    free_space.set("/home", 20);
    assert!(!warning.check(&home).await.unwrap());
    assert!(watch.warn(&home));

    free_space.set("/home", 5);
    assert!(warning.check(&home).await.unwrap());
    assert!(notifier.sent().len() == 1);
}

#[tokio::test]
async fn test_external_body() {
    let (free_space, notifier, watch, warning) = setup();
    watch.set(USB, true);
    free_space.set(USB, 1);

    assert!(warning.check(&Mountpoint::from(USB)).await.unwrap());
    assert_eq!(
        notifier.next().await.card().unwrap().body,
        "Only 1% is available on the external storage device"
    );
}

#[tokio::test]
async fn test_unwatched_mountpoint_never_warns() {
    let (free_space, notifier, watch, warning) = setup();
    free_space.set(USB, 0);
    let usb = Mountpoint::from(USB);

    assert!(!warning.check(&usb).await.unwrap());
    free_space.set(USB, 50);
    assert!(!warning.check(&usb).await.unwrap());
    assert!(!watch.contains(&usb));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_check_all_skips_failures() {
    let (free_space, notifier, watch, warning) = setup();
    watch.set(USB, true);
    free_space.set(USB, 2);
    // /home has no reading and fails

    assert_eq!(warning.check_all().await, 1);
    assert_eq!(notifier.sent().len(), 1);
    assert!(matches!(
        warning.check(&Mountpoint::from("/home")).await,
        Err(WatchError::Io(_))
    ));
}

#[tokio::test]
async fn test_notifier_failure_keeps_flag() {
    let (free_space, notifier, watch, warning) = setup();
    notifier.fail();
    free_space.set("/home", 1);
    let home = Mountpoint::from("/home");

    assert!(matches!(
        warning.check(&home).await,
        Err(WatchError::Notification(_))
    ));
    assert!(watch.warn(&home));
}

#[test]
fn test_mount_watch() {
    let watch = MountWatch::with_home("/home");
    assert_eq!(watch.mountpoints(), vec![Mountpoint::from("/home")]);

    watch.set(USB, true);
    assert!(watch.warn(&Mountpoint::from(USB)));
    assert!(watch.remove(&Mountpoint::from(USB)));
    assert!(!watch.remove(&Mountpoint::from(USB)));
    assert!(!watch.warn(&Mountpoint::from(USB)));

    assert!(Mountpoint::from(USB).is_external("/media"));
    assert!(!Mountpoint::from("/mediathek").is_external("/media"));
    assert!(!Mountpoint::from("/home").is_external("/media"));
}

#[test]
fn test_statvfs_on_root() {
    let percentage = StatvfsFreeSpace::new()
        .free_percentage(Path::new("/"))
        .unwrap();
    assert!(percentage <= 100);
    assert!(StatvfsFreeSpace::new()
        .free_percentage(Path::new("/definitely/not/mounted/here"))
        .is_err());
}
