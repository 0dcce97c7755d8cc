//! Conflict detection and resolution end to end

use cirrus_core::domain::{ChangeKind, ConflictType, ResolutionOption, SyncEvent, SyncState};
use cirrus_sync::SyncError;

use crate::common::{self, remote, Harness};

/// A local file the engine never saw meets a different remote file
async fn content_conflict(h: &Harness, path: &str) {
    h.write(path, b"local edit");
    let descriptor = h.transport.put_file(path, b"remote edit");
    h.remote_event(ChangeKind::Created, descriptor).await;
}

fn other_files(h: &Harness, except: &str) -> Vec<String> {
    std::fs::read_dir(h.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != except)
        .collect()
}

#[tokio::test]
async fn test_differing_local_copy_raises_content_conflict() {
    let h = Harness::new().await;
    let mut rx = h.engine.subscribe();

    content_conflict(&h, "/c.txt").await;

    assert_eq!(h.state("/c.txt").await, Some(SyncState::Conflict));
    let pending = h.engine.pending_conflicts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].conflict_type(), ConflictType::Content);
    assert!(common::drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SyncEvent::ConflictDetected(_))));

    // Neither side is touched while the conflict is pending
    h.settle().await;
    assert_eq!(h.read("/c.txt").as_deref(), Some(&b"local edit"[..]));
    assert_eq!(h.transport.content("/c.txt").as_deref(), Some(&b"remote edit"[..]));
}

#[tokio::test]
async fn test_keep_both_keeps_local_edit_as_conflict_copy() {
    let h = Harness::new().await;
    content_conflict(&h, "/c.txt").await;

    h.engine
        .resolve_conflict(&remote("/c.txt"), ResolutionOption::KeepBoth)
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.state("/c.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/c.txt").as_deref(), Some(&b"remote edit"[..]));
    assert!(h.engine.pending_conflicts().await.unwrap().is_empty());

    let copies = other_files(&h, "c.txt");
    assert_eq!(copies.len(), 1, "unexpected files: {copies:?}");
    let copy = format!("/{}", copies[0]);
    assert_eq!(h.read(&copy).as_deref(), Some(&b"local edit"[..]));
    assert_eq!(h.transport.content(&copy).as_deref(), Some(&b"local edit"[..]));
    assert_eq!(h.state(&copy).await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_keep_local_overwrites_remote() {
    let h = Harness::new().await;
    content_conflict(&h, "/c.txt").await;

    h.engine
        .resolve_conflict(&remote("/c.txt"), ResolutionOption::KeepLocal)
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.state("/c.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/c.txt").as_deref(), Some(&b"local edit"[..]));
    assert_eq!(h.read("/c.txt").as_deref(), Some(&b"local edit"[..]));
    assert!(other_files(&h, "c.txt").is_empty());
}

#[tokio::test]
async fn test_keep_remote_overwrites_local() {
    let h = Harness::new().await;
    content_conflict(&h, "/c.txt").await;

    h.engine
        .resolve_conflict(&remote("/c.txt"), ResolutionOption::KeepRemote)
        .await
        .unwrap();

    assert_eq!(h.state("/c.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/c.txt").as_deref(), Some(&b"remote edit"[..]));
    assert!(h.engine.is_available_offline(&remote("/c.txt")));
}

#[tokio::test]
async fn test_resolving_item_without_conflict_is_rejected() {
    let h = Harness::new().await;
    h.synced_file("/ok.txt", b"fine").await;

    let err = h
        .engine
        .resolve_conflict(&remote("/ok.txt"), ResolutionOption::KeepLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoConflict(_)));

    let err = h
        .engine
        .resolve_conflict(&remote("/missing.txt"), ResolutionOption::KeepLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownPath(_)));
}

#[tokio::test]
async fn test_type_conflict_offers_no_keep_both() {
    let h = Harness::new().await;
    h.mkdir("/t");
    let descriptor = h.transport.put_file("/t", b"a file now");
    h.remote_event(ChangeKind::Created, descriptor).await;

    let pending = h.engine.pending_conflicts().await.unwrap();
    assert_eq!(pending[0].conflict_type(), ConflictType::Type);

    let err = h
        .engine
        .resolve_conflict(&remote("/t"), ResolutionOption::KeepBoth)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::OptionNotOffered { .. }));
    assert_eq!(h.state("/t").await, Some(SyncState::Conflict));

    h.engine
        .resolve_conflict(&remote("/t"), ResolutionOption::KeepRemote)
        .await
        .unwrap();
    assert_eq!(h.state("/t").await, Some(SyncState::Synced));
    assert!(h.local("/t").is_file());
    assert_eq!(h.read("/t").as_deref(), Some(&b"a file now"[..]));
}

#[tokio::test]
async fn test_policy_resolves_conflicts_automatically() {
    let h = Harness::build(|b| b.conflicts_default_strategy("keep_remote")).await;

    content_conflict(&h, "/auto.txt").await;

    assert_eq!(h.state("/auto.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/auto.txt").as_deref(), Some(&b"remote edit"[..]));
    assert!(h.engine.pending_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_all_applies_option_to_every_conflict() {
    let h = Harness::new().await;
    content_conflict(&h, "/one.txt").await;
    content_conflict(&h, "/two.txt").await;

    let result = h.engine.resolve_all(ResolutionOption::KeepLocal).await.unwrap();

    assert_eq!(result.resolved, 2);
    assert_eq!(result.failed, 0);
    assert!(h.engine.pending_conflicts().await.unwrap().is_empty());
    assert_eq!(h.transport.content("/one.txt").as_deref(), Some(&b"local edit"[..]));
    assert_eq!(h.transport.content("/two.txt").as_deref(), Some(&b"local edit"[..]));
}

#[tokio::test]
async fn test_changes_during_conflict_wait_for_resolution() {
    let h = Harness::new().await;
    content_conflict(&h, "/c.txt").await;

    h.write("/c.txt", b"edited again");
    h.local_event(ChangeKind::Modified, "/c.txt").await;
    assert_eq!(h.state("/c.txt").await, Some(SyncState::Conflict));

    h.engine
        .resolve_conflict(&remote("/c.txt"), ResolutionOption::KeepLocal)
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.state("/c.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/c.txt").as_deref(), Some(&b"edited again"[..]));
}
