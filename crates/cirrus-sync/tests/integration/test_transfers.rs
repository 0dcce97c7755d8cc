//! Uploads, downloads and the echoes they produce

use cirrus_core::domain::{ChangeKind, SyncEvent, SyncState};

use crate::common::{self, remote, Harness};

#[tokio::test]
async fn test_new_local_file_is_uploaded() {
    let h = Harness::new().await;
    h.write("/a.txt", b"hello");

    h.local_event(ChangeKind::Created, "/a.txt").await;
    assert_eq!(h.state("/a.txt").await, Some(SyncState::Uploading));

    h.settle().await;
    assert_eq!(h.state("/a.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/a.txt").as_deref(), Some(&b"hello"[..]));

    let item = h.engine.get_item(&remote("/a.txt")).await.unwrap().unwrap();
    assert!(item.remote_id().is_some());
    assert_eq!(item.fingerprint(), item.remote_fingerprint());
}

#[tokio::test]
async fn test_folder_is_created_remotely_before_its_children() {
    let h = Harness::new().await;
    h.mkdir("/docs");
    h.write("/docs/a.txt", b"inside");

    h.local_event(ChangeKind::Created, "/docs").await;
    h.local_event(ChangeKind::Created, "/docs/a.txt").await;
    h.settle().await;

    let calls = h.transport.calls();
    let folder = calls.iter().position(|c| c == "upload /docs").unwrap();
    let child = calls.iter().position(|c| c == "upload /docs/a.txt").unwrap();
    assert!(folder < child, "calls: {calls:?}");

    let parent = h.engine.get_item(&remote("/docs")).await.unwrap().unwrap();
    let file = h.engine.get_item(&remote("/docs/a.txt")).await.unwrap().unwrap();
    assert_eq!(file.parent_id(), Some(parent.id()));
    assert_eq!(h.state("/docs/a.txt").await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_remote_file_is_downloaded() {
    let h = Harness::new().await;
    h.downloaded_file("/b.txt", b"from the cloud").await;

    assert_eq!(h.read("/b.txt").as_deref(), Some(&b"from the cloud"[..]));
    assert!(h.engine.is_available_offline(&remote("/b.txt")));
    assert_eq!(h.engine.cache_usage().item_count, 1);
}

#[tokio::test]
async fn test_local_echo_of_download_is_ignored() {
    let h = Harness::new().await;
    h.downloaded_file("/b.txt", b"remote").await;

    // The watcher reports the file the engine just wrote
    h.local_event(ChangeKind::Modified, "/b.txt").await;

    assert_eq!(h.state("/b.txt").await, Some(SyncState::Synced));
    h.settle().await;
    assert_eq!(h.transport.count("upload"), 0);
}

#[tokio::test]
async fn test_remote_echo_of_upload_is_ignored() {
    let h = Harness::new().await;
    h.synced_file("/a.txt", b"mine").await;
    let downloads_before = h.transport.count("download");

    // The change listing reports the object the engine just uploaded
    let descriptor = h.transport.put_file("/a.txt", b"mine");
    h.remote_event(ChangeKind::Modified, descriptor).await;
    h.settle().await;

    assert_eq!(h.state("/a.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.count("download"), downloads_before);
}

#[tokio::test]
async fn test_local_modification_is_uploaded_again() {
    let h = Harness::new().await;
    h.synced_file("/c.txt", b"v1").await;

    h.write("/c.txt", b"version two");
    h.local_event(ChangeKind::Modified, "/c.txt").await;
    assert_eq!(h.state("/c.txt").await, Some(SyncState::Uploading));
    h.settle().await;

    assert_eq!(h.transport.content("/c.txt").as_deref(), Some(&b"version two"[..]));
    assert_eq!(h.transport.count("upload /c.txt"), 2);
}

#[tokio::test]
async fn test_remote_modification_is_downloaded() {
    let h = Harness::new().await;
    h.downloaded_file("/d.txt", b"v1").await;

    let descriptor = h.transport.put_file("/d.txt", b"second version");
    h.remote_event(ChangeKind::Modified, descriptor).await;
    assert_eq!(h.state("/d.txt").await, Some(SyncState::Downloading));
    h.settle().await;

    assert_eq!(h.read("/d.txt").as_deref(), Some(&b"second version"[..]));
    assert_eq!(h.state("/d.txt").await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_local_move_is_propagated_as_remote_move() {
    let h = Harness::new().await;
    h.synced_file("/m.txt", b"moving").await;

    std::fs::rename(h.local("/m.txt"), h.local("/n.txt")).unwrap();
    h.local_event(ChangeKind::Moved { from: remote("/m.txt") }, "/n.txt")
        .await;
    h.settle().await;

    assert_eq!(h.state("/m.txt").await, None);
    assert_eq!(h.state("/n.txt").await, Some(SyncState::Synced));
    assert!(h.transport.contains("/n.txt"));
    assert!(!h.transport.contains("/m.txt"));
    assert!(h.transport.calls().contains(&"move /m.txt -> /n.txt".to_string()));
    assert_eq!(h.transport.count("upload"), 1);
}

#[tokio::test]
async fn test_excluded_names_are_not_tracked() {
    let h = Harness::new().await;
    h.write("/scratch.tmp", b"ignore me");

    h.local_event(ChangeKind::Created, "/scratch.tmp").await;
    h.settle().await;

    assert_eq!(h.state("/scratch.tmp").await, None);
    assert_eq!(h.transport.count("upload"), 0);
}

#[tokio::test]
async fn test_progress_counts_transfers_and_resets_when_idle() {
    let h = Harness::new().await;
    let mut rx = h.engine.subscribe();

    h.synced_file("/p1.txt", b"12345").await;

    let events = common::drain(&mut rx);
    let finished = events.iter().any(|e| match e {
        SyncEvent::Progress(p) => p.completed_items == 1 && p.total_items == 1 && p.transferred_bytes == 5,
        _ => false,
    });
    assert!(finished, "no completed progress snapshot in {events:?}");
    assert_eq!(h.engine.progress().total_items, 0);
    assert_eq!(h.engine.active_transfers(), 0);
}
