//! The scheduler loop between the change channel and the engine

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cirrus_core::domain::{ChangeEvent, ChangeKind, SyncState};
use cirrus_sync::SyncScheduler;

use crate::common::{remote, Harness};

const LONG: Duration = Duration::from_secs(3600);

fn scheduler(
    h: &Harness,
    debounce: Duration,
) -> (SyncScheduler, mpsc::Sender<ChangeEvent>, CancellationToken) {
    let (tx, rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let (scheduler, _flag) = SyncScheduler::new(h.engine.clone(), rx, debounce, LONG, shutdown.clone());
    (scheduler, tx, shutdown)
}

fn created(path: &str) -> ChangeEvent {
    ChangeEvent::local(ChangeKind::Created, remote(path))
}

#[tokio::test]
async fn test_closing_channel_applies_pending_events() {
    let h = Harness::new().await;
    let (mut scheduler, tx, _shutdown) = scheduler(&h, LONG);
    h.write("/late.txt", b"still applied");

    let task = tokio::spawn(async move { scheduler.run().await });
    tx.send(created("/late.txt")).await.unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler did not stop after the channel closed")
        .unwrap();

    h.settle().await;
    assert_eq!(h.state("/late.txt").await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_settled_event_reaches_engine() {
    let h = Harness::new().await;
    let (mut scheduler, tx, shutdown) = scheduler(&h, Duration::from_millis(20));
    h.write("/quick.txt", b"settles fast");

    let task = tokio::spawn(async move { scheduler.run().await });
    tx.send(created("/quick.txt")).await.unwrap();

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        while h.state("/quick.txt").await != Some(SyncState::Synced) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(synced.is_ok(), "event was never applied");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_requested_sync_bypasses_debounce() {
    let h = Harness::new().await;
    let (mut scheduler, _tx, _shutdown) = scheduler(&h, LONG);
    h.write("/now.txt", b"right away");

    scheduler.enqueue(created("/now.txt"));
    assert_eq!(scheduler.flush().await, 0);
    assert_eq!(scheduler.pending_count(), 1);

    scheduler.request_sync();
    assert!(scheduler.is_sync_requested());
    assert_eq!(scheduler.flush().await, 1);
    assert!(!scheduler.is_sync_requested());
    assert_eq!(scheduler.pending_count(), 0);
    assert!(matches!(
        h.state("/now.txt").await,
        Some(SyncState::Uploading | SyncState::Synced)
    ));
}

#[tokio::test]
async fn test_shutdown_ends_run() {
    let h = Harness::new().await;
    let (mut scheduler, tx, shutdown) = scheduler(&h, LONG);
    tx.send(created("/never.txt")).await.unwrap();

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("scheduler ignored shutdown");

    assert_eq!(h.state("/never.txt").await, None);
}
