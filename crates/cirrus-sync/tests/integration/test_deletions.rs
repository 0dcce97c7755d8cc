//! Deletions on either side and their races with modifications

use cirrus_core::domain::{ChangeKind, SyncFailure, SyncState};

use crate::common::{remote, Call, Harness};

#[tokio::test]
async fn test_local_delete_is_propagated() {
    let h = Harness::new().await;
    h.synced_file("/x.txt", b"bye").await;

    std::fs::remove_file(h.local("/x.txt")).unwrap();
    h.local_event(ChangeKind::Deleted, "/x.txt").await;
    h.settle().await;

    assert_eq!(h.state("/x.txt").await, None);
    assert!(!h.transport.contains("/x.txt"));
    assert_eq!(h.transport.count("delete /x.txt"), 1);
}

#[tokio::test]
async fn test_local_folder_delete_removes_remote_subtree() {
    let h = Harness::new().await;
    h.mkdir("/f");
    h.write("/f/a.txt", b"a");
    h.write("/f/b.txt", b"b");
    for path in ["/f", "/f/a.txt", "/f/b.txt"] {
        h.local_event(ChangeKind::Created, path).await;
    }
    h.settle().await;
    assert_eq!(h.transport.paths().len(), 3);

    std::fs::remove_dir_all(h.local("/f")).unwrap();
    h.local_event(ChangeKind::Deleted, "/f").await;
    h.settle().await;

    assert!(h.transport.paths().is_empty());
    for path in ["/f", "/f/a.txt", "/f/b.txt"] {
        assert_eq!(h.state(path).await, None, "{path} still tracked");
    }
}

#[tokio::test]
async fn test_deleting_unsynced_file_never_reaches_remote() {
    let h = Harness::new().await;
    h.write("/draft.txt", b"draft");
    h.local_event(ChangeKind::Created, "/draft.txt").await;
    assert_eq!(h.state("/draft.txt").await, Some(SyncState::Uploading));

    std::fs::remove_file(h.local("/draft.txt")).unwrap();
    h.local_event(ChangeKind::Deleted, "/draft.txt").await;
    h.settle().await;

    assert_eq!(h.state("/draft.txt").await, None);
    assert!(!h.transport.contains("/draft.txt"));
    assert_eq!(h.transport.count("upload"), 0);
    assert_eq!(h.transport.count("delete"), 0);
}

#[tokio::test]
async fn test_remote_delete_removes_unchanged_local_copy() {
    let h = Harness::new().await;
    h.downloaded_file("/y.txt", b"remote").await;

    h.transport.remove("/y.txt");
    h.remote_deleted("/y.txt").await;

    assert_eq!(h.state("/y.txt").await, None);
    assert!(!h.exists("/y.txt"));
    assert!(!h.engine.is_available_offline(&remote("/y.txt")));
}

#[tokio::test]
async fn test_remote_delete_loses_to_local_modification() {
    let h = Harness::new().await;
    h.downloaded_file("/z.txt", b"v1").await;

    h.write("/z.txt", b"changed locally");
    h.transport.remove("/z.txt");
    h.remote_deleted("/z.txt").await;
    assert_eq!(h.state("/z.txt").await, Some(SyncState::Uploading));

    h.settle().await;
    assert_eq!(h.state("/z.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/z.txt").as_deref(), Some(&b"changed locally"[..]));
    assert_eq!(h.read("/z.txt").as_deref(), Some(&b"changed locally"[..]));
}

#[tokio::test]
async fn test_remote_folder_delete_keeps_folder_with_local_work() {
    let h = Harness::new().await;
    let folder = h.transport.put_folder("/shared");
    h.remote_event(ChangeKind::Created, folder).await;
    h.downloaded_file("/shared/old.txt", b"old").await;
    h.write("/shared/new.txt", b"mine");
    h.local_event(ChangeKind::Created, "/shared/new.txt").await;

    h.transport.remove("/shared");
    h.remote_deleted("/shared").await;

    // The untouched download is gone, the local-only file and its folder stay
    assert!(!h.exists("/shared/old.txt"));
    assert_eq!(h.state("/shared/old.txt").await, None);
    assert!(h.exists("/shared/new.txt"));
    assert_eq!(h.state("/shared").await, Some(SyncState::Uploading));
    assert_eq!(h.state("/shared/new.txt").await, Some(SyncState::Uploading));

    h.settle().await;
    assert!(h.transport.contains("/shared"));
    assert_eq!(h.transport.content("/shared/new.txt").as_deref(), Some(&b"mine"[..]));
}

#[tokio::test]
async fn test_refused_remote_delete_restores_cloud_only_item() {
    let h = Harness::new().await;
    h.synced_file("/keep.txt", b"precious").await;
    h.transport
        .fail_next(Call::Delete, SyncFailure::PermissionDenied("read-only share".to_string()), 1);

    std::fs::remove_file(h.local("/keep.txt")).unwrap();
    h.local_event(ChangeKind::Deleted, "/keep.txt").await;
    h.settle().await;

    assert_eq!(h.state("/keep.txt").await, Some(SyncState::CloudOnly));
    assert!(h.transport.contains("/keep.txt"));
    assert_eq!(h.engine.error_statistics().permanent, 1);
}
