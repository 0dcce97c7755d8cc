//! Failure classification, backoff retries and terminal failures

use cirrus_core::domain::{ChangeKind, EngineState, OperationKind, SyncEvent, SyncFailure, SyncState};

use crate::common::{self, remote, Call, Harness};

async fn queue_upload(h: &Harness, path: &str) {
    h.write(path, b"payload");
    h.local_event(ChangeKind::Created, path).await;
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let h = Harness::new().await;
    h.transport.fail_next(Call::Upload, SyncFailure::NetworkUnavailable, 1);

    queue_upload(&h, "/r.txt").await;
    h.settle().await;

    assert_eq!(h.state("/r.txt").await, Some(SyncState::Synced));
    assert_eq!(h.transport.count("upload /r.txt"), 2);
    assert!(h.engine.pending_retries().is_empty());

    let stats = h.engine.error_statistics();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.transient, 1);
    assert_eq!(stats.terminal, 0);
    assert_eq!(stats.by_kind.get("network_unavailable"), Some(&1));
}

#[tokio::test]
async fn test_retries_stop_after_max_attempts() {
    let h = Harness::new().await;
    let mut rx = h.engine.subscribe();
    h.transport.fail_next(Call::Upload, SyncFailure::ServerError(503), 10);

    queue_upload(&h, "/flaky.txt").await;
    h.settle().await;

    assert_eq!(h.state("/flaky.txt").await, Some(SyncState::Error));
    assert_eq!(h.transport.count("upload /flaky.txt"), 3);
    let item = h.engine.get_item(&remote("/flaky.txt")).await.unwrap().unwrap();
    assert!(item.error().is_some());

    let stats = h.engine.error_statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.terminal, 1);

    let failures: Vec<bool> = common::drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::OperationFailed {
                operation: OperationKind::Upload,
                terminal,
                ..
            } => Some(terminal),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![false, false, true]);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::new().await;
    h.transport.fail_next(
        Call::Upload,
        SyncFailure::PermissionDenied("/denied.txt".to_string()),
        1,
    );

    queue_upload(&h, "/denied.txt").await;
    h.settle().await;

    assert_eq!(h.state("/denied.txt").await, Some(SyncState::Error));
    assert_eq!(h.transport.count("upload"), 1);
    assert_eq!(h.engine.error_statistics().permanent, 1);
}

#[tokio::test]
async fn test_failed_item_uploads_after_next_local_change() {
    let h = Harness::new().await;
    h.transport.fail_next(Call::Upload, SyncFailure::QuotaExceeded, 1);
    queue_upload(&h, "/later.txt").await;
    h.settle().await;
    assert_eq!(h.state("/later.txt").await, Some(SyncState::Error));

    h.write("/later.txt", b"smaller payload");
    h.local_event(ChangeKind::Modified, "/later.txt").await;
    h.settle().await;

    assert_eq!(h.state("/later.txt").await, Some(SyncState::Synced));
    let item = h.engine.get_item(&remote("/later.txt")).await.unwrap().unwrap();
    assert!(item.error().is_none());
}

#[tokio::test]
async fn test_authentication_failure_puts_engine_in_error() {
    let h = Harness::new().await;
    h.transport.fail_next(Call::Upload, SyncFailure::AuthenticationFailed, 1);

    queue_upload(&h, "/auth.txt").await;
    h.settle().await;

    assert!(matches!(h.engine.engine_state(), EngineState::Error(_)));
    assert!(h.engine.resume().await.is_err());
}

#[tokio::test]
async fn test_failed_download_is_retried() {
    let h = Harness::new().await;
    h.transport.fail_next(Call::Download, SyncFailure::Timeout, 2);

    h.downloaded_file("/dl.txt", b"eventually").await;

    assert_eq!(h.transport.count("download /dl.txt"), 3);
    assert_eq!(h.read("/dl.txt").as_deref(), Some(&b"eventually"[..]));
}
