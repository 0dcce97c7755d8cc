//! Engine and item lifecycle: pause, resume, cancel, stop, network changes

use std::time::Duration;

use cirrus_core::domain::{ChangeKind, EngineState, SyncState};
use cirrus_sync::SyncError;

use crate::common::{remote, Harness};

const HOLD: Duration = Duration::from_secs(60);

/// Queue an upload and start it; the transport holds it until cancelled
async fn running_upload(h: &Harness, path: &str) {
    h.transport.delay_uploads(Some(HOLD));
    h.write(path, b"large payload");
    h.local_event(ChangeKind::Created, path).await;
    assert_eq!(h.engine.tick().await.unwrap(), 1);
    assert_eq!(h.engine.active_transfers(), 1);
}

#[tokio::test]
async fn test_cancel_running_upload_restores_previous_state() {
    let h = Harness::new().await;
    running_upload(&h, "/big.bin").await;

    h.engine.cancel(&remote("/big.bin")).await.unwrap();

    assert_eq!(h.engine.active_transfers(), 0);
    assert_eq!(h.state("/big.bin").await, Some(SyncState::LocalOnly));
    tokio::time::timeout(Duration::from_secs(5), h.engine.stop())
        .await
        .expect("cancelled transfer task did not end")
        .unwrap();
    assert!(!h.transport.contains("/big.bin"));
}

#[tokio::test]
async fn test_cancelled_edit_is_uploaded_when_the_change_is_seen_again() {
    let h = Harness::new().await;
    h.synced_file("/notes.txt", b"v1").await;

    h.write("/notes.txt", b"v2 edited");
    h.local_event(ChangeKind::Modified, "/notes.txt").await;
    assert_eq!(h.state("/notes.txt").await, Some(SyncState::Uploading));

    h.engine.cancel(&remote("/notes.txt")).await.unwrap();
    assert_eq!(h.state("/notes.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/notes.txt").as_deref(), Some(&b"v1"[..]));

    h.local_event(ChangeKind::Modified, "/notes.txt").await;
    assert_eq!(h.state("/notes.txt").await, Some(SyncState::Uploading));
    h.settle().await;

    assert_eq!(h.state("/notes.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/notes.txt").as_deref(), Some(&b"v2 edited"[..]));
}

#[tokio::test]
async fn test_cancelled_download_is_fetched_when_the_change_is_seen_again() {
    let h = Harness::new().await;
    h.downloaded_file("/d.txt", b"v1").await;

    let descriptor = h.transport.put_file("/d.txt", b"v2 remote");
    h.remote_event(ChangeKind::Modified, descriptor.clone()).await;
    assert_eq!(h.state("/d.txt").await, Some(SyncState::Downloading));

    h.engine.cancel(&remote("/d.txt")).await.unwrap();
    assert_eq!(h.state("/d.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/d.txt").as_deref(), Some(&b"v1"[..]));

    h.remote_event(ChangeKind::Modified, descriptor).await;
    assert_eq!(h.state("/d.txt").await, Some(SyncState::Downloading));
    h.settle().await;

    assert_eq!(h.state("/d.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/d.txt").as_deref(), Some(&b"v2 remote"[..]));
}

#[tokio::test]
async fn test_cancelled_new_file_is_uploaded_when_seen_again() {
    let h = Harness::new().await;
    h.write("/fresh.txt", b"fresh");
    h.local_event(ChangeKind::Created, "/fresh.txt").await;
    h.engine.cancel(&remote("/fresh.txt")).await.unwrap();
    assert_eq!(h.state("/fresh.txt").await, Some(SyncState::LocalOnly));

    h.local_event(ChangeKind::Modified, "/fresh.txt").await;
    h.settle().await;

    assert_eq!(h.state("/fresh.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/fresh.txt").as_deref(), Some(&b"fresh"[..]));
}

#[tokio::test]
async fn test_cancel_without_transfer_is_rejected() {
    let h = Harness::new().await;
    h.synced_file("/done.txt", b"done").await;

    let err = h.engine.cancel(&remote("/done.txt")).await.unwrap_err();
    assert!(matches!(err, SyncError::NotCancellable(_)));

    let err = h.engine.cancel(&remote("/nothing.txt")).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownPath(_)));
}

#[tokio::test]
async fn test_paused_item_resumes_its_transfer() {
    let h = Harness::new().await;
    running_upload(&h, "/p.bin").await;

    h.engine.pause_item(&remote("/p.bin")).await.unwrap();
    assert_eq!(h.state("/p.bin").await, Some(SyncState::Paused));
    assert_eq!(h.engine.active_transfers(), 0);
    assert_eq!(h.engine.tick().await.unwrap(), 0);

    h.transport.delay_uploads(None);
    h.engine.resume_item(&remote("/p.bin")).await.unwrap();
    assert_eq!(h.state("/p.bin").await, Some(SyncState::Uploading));
    h.settle().await;

    assert_eq!(h.state("/p.bin").await, Some(SyncState::Synced));
    assert_eq!(h.transport.count("upload /p.bin"), 2);
}

#[tokio::test]
async fn test_engine_pause_holds_queued_transfers() {
    let h = Harness::new().await;
    h.write("/q.txt", b"queued");
    h.local_event(ChangeKind::Created, "/q.txt").await;

    h.engine.pause().await.unwrap();
    assert_eq!(h.engine.engine_state(), EngineState::Paused);
    assert_eq!(h.state("/q.txt").await, Some(SyncState::Paused));
    assert_eq!(h.engine.tick().await.unwrap(), 0);

    h.engine.resume().await.unwrap();
    assert_eq!(h.engine.engine_state(), EngineState::Syncing);
    assert_eq!(h.state("/q.txt").await, Some(SyncState::Uploading));
    h.settle().await;
    assert_eq!(h.state("/q.txt").await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_user_paused_item_stays_paused_after_engine_resume() {
    let h = Harness::new().await;
    h.write("/mine.txt", b"hold this");
    h.local_event(ChangeKind::Created, "/mine.txt").await;
    h.engine.pause_item(&remote("/mine.txt")).await.unwrap();

    h.engine.pause().await.unwrap();
    h.engine.resume().await.unwrap();
    h.settle().await;

    assert_eq!(h.state("/mine.txt").await, Some(SyncState::Paused));
    assert_eq!(h.transport.count("upload"), 0);
}

#[tokio::test]
async fn test_pause_requires_running_engine() {
    let h = Harness::new().await;
    h.engine.stop().await.unwrap();
    assert_eq!(h.engine.engine_state(), EngineState::Idle);

    let err = h.engine.pause().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidEngineState { command: "pause", .. }));

    h.engine.start().await.unwrap();
    assert_eq!(h.engine.engine_state(), EngineState::Syncing);
}

#[tokio::test]
async fn test_stop_interrupts_running_transfer() {
    let h = Harness::new().await;
    running_upload(&h, "/s.bin").await;

    tokio::time::timeout(Duration::from_secs(5), h.engine.stop())
        .await
        .expect("stop waited for the held upload")
        .unwrap();

    assert_eq!(h.engine.active_transfers(), 0);
    assert_eq!(h.state("/s.bin").await, Some(SyncState::LocalOnly));
    assert_eq!(h.engine.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn test_offline_changes_are_replayed_when_network_returns() {
    let h = Harness::new().await;
    assert_eq!(h.engine.set_network_available(false).await.unwrap(), 0);
    assert!(!h.engine.is_online());

    h.write("/o.txt", b"written offline");
    h.local_event(ChangeKind::Created, "/o.txt").await;
    assert_eq!(h.state("/o.txt").await, None);
    assert_eq!(h.engine.tick().await.unwrap(), 0);

    assert_eq!(h.engine.set_network_available(true).await.unwrap(), 1);
    assert_eq!(h.state("/o.txt").await, Some(SyncState::Uploading));
    h.settle().await;

    assert_eq!(h.state("/o.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/o.txt").as_deref(), Some(&b"written offline"[..]));
}

#[tokio::test]
async fn test_events_for_running_transfer_are_deferred() {
    let h = Harness::new().await;
    running_upload(&h, "/busy.txt").await;

    h.write("/busy.txt", b"newer content");
    h.local_event(ChangeKind::Modified, "/busy.txt").await;
    assert_eq!(h.state("/busy.txt").await, Some(SyncState::Uploading));

    // Drop the held upload; the deferred change is replayed by the next tick
    h.engine.cancel(&remote("/busy.txt")).await.unwrap();
    h.transport.delay_uploads(None);
    h.settle().await;

    assert_eq!(h.state("/busy.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.content("/busy.txt").as_deref(), Some(&b"newer content"[..]));
}
