//! Selective sync of remote folders

use cirrus_core::domain::{ChangeKind, SyncState};

use crate::common::{remote, Harness};

/// /A/x.txt and /B/y.txt, both downloaded
async fn two_folders() -> Harness {
    let h = Harness::new().await;
    for folder in ["/A", "/B"] {
        let descriptor = h.transport.put_folder(folder);
        h.remote_event(ChangeKind::Created, descriptor).await;
    }
    h.downloaded_file("/A/x.txt", b"alpha").await;
    h.downloaded_file("/B/y.txt", b"bravo!").await;
    h
}

#[tokio::test]
async fn test_deselecting_folder_removes_local_copies() {
    let h = two_folders().await;
    assert_eq!(h.state("/B").await, Some(SyncState::Synced));

    let change = h.engine.select(&remote("/B"), false).await.unwrap();
    assert!(!change.selected);
    assert_eq!(change.changed, vec![remote("/B")]);
    assert_eq!(change.affected_bytes, 6);

    assert!(!h.exists("/B/y.txt"));
    assert!(!h.exists("/B"));
    assert_eq!(h.state("/B/y.txt").await, Some(SyncState::CloudOnly));
    assert_eq!(h.state("/B").await, Some(SyncState::CloudOnly));
    assert!(h.transport.contains("/B/y.txt"));

    assert!(!h.engine.is_selected(&remote("/B")).await);
    assert!(!h.engine.is_selected(&remote("/B/y.txt")).await);
    assert!(h.engine.is_selected(&remote("/A")).await);
    assert_eq!(h.read("/A/x.txt").as_deref(), Some(&b"alpha"[..]));
}

#[tokio::test]
async fn test_deselection_keeps_local_modifications() {
    let h = two_folders().await;
    h.write("/B/y.txt", b"edited but not yet seen");

    h.engine.select(&remote("/B"), false).await.unwrap();

    assert!(h.exists("/B/y.txt"));
    assert_eq!(h.state("/B/y.txt").await, Some(SyncState::Synced));
    assert!(h.exists("/B"));
}

#[tokio::test]
async fn test_new_remote_file_in_deselected_folder_stays_in_cloud() {
    let h = two_folders().await;
    h.engine.select(&remote("/B"), false).await.unwrap();

    let descriptor = h.transport.put_file("/B/z.txt", b"zulu");
    h.remote_event(ChangeKind::Created, descriptor).await;
    h.settle().await;

    assert_eq!(h.state("/B/z.txt").await, Some(SyncState::CloudOnly));
    assert!(!h.exists("/B/z.txt"));
    assert_eq!(h.transport.count("download /B/z.txt"), 0);
}

#[tokio::test]
async fn test_reselecting_folder_downloads_its_files() {
    let h = two_folders().await;
    h.engine.select(&remote("/B"), false).await.unwrap();
    let descriptor = h.transport.put_file("/B/z.txt", b"zulu");
    h.remote_event(ChangeKind::Created, descriptor).await;

    let change = h.engine.select(&remote("/B"), true).await.unwrap();
    assert!(change.selected);
    assert_eq!(h.state("/B/z.txt").await, Some(SyncState::Downloading));
    h.settle().await;

    assert_eq!(h.read("/B/y.txt").as_deref(), Some(&b"bravo!"[..]));
    assert_eq!(h.read("/B/z.txt").as_deref(), Some(&b"zulu"[..]));
    assert_eq!(h.state("/B/z.txt").await, Some(SyncState::Synced));
    assert!(h.engine.is_selected(&remote("/B")).await);
}

#[tokio::test]
async fn test_estimated_size_does_not_double_count_nested_paths() {
    let h = two_folders().await;

    let size = h
        .engine
        .estimated_size(&[remote("/A"), remote("/A/x.txt"), remote("/B")])
        .await;
    assert_eq!(size, 5 + 6);
    assert_eq!(h.engine.estimated_size(&[remote("/")]).await, 11);
}

#[tokio::test]
async fn test_selection_survives_tree_refresh() {
    let h = two_folders().await;
    h.engine.select(&remote("/B"), false).await.unwrap();

    let folders = h.engine.refresh_tree().await.unwrap();
    assert_eq!(folders, 3);
    assert!(!h.engine.is_selected(&remote("/B")).await);
    assert!(h.engine.is_selected(&remote("/A")).await);

    let selected = h.engine.selected_paths().await;
    assert!(selected.contains(&remote("/A")));
    assert!(!selected.contains(&remote("/B")));
}
