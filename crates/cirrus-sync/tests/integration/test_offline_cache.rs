//! Pinning and cache budget enforcement

use cirrus_cache::CacheError;
use cirrus_core::domain::SyncState;
use cirrus_sync::SyncError;

use crate::common::{remote, Harness};

#[tokio::test]
async fn test_pinned_file_survives_budget_enforcement() {
    let h = Harness::new().await;
    h.downloaded_file("/keep.pdf", b"offline reading").await;

    assert_eq!(h.engine.pin(&remote("/keep.pdf")).await.unwrap(), 1);
    let usage = h.engine.cache_usage();
    assert_eq!(usage.item_count, 1);
    assert_eq!(usage.pinned_bytes, 15);

    let err = h.engine.enforce_cache_budget(0).await.unwrap_err();
    match err {
        SyncError::Cache(CacheError::BudgetUnreachable { used_bytes, evicted, .. }) => {
            assert_eq!(used_bytes, 15);
            assert!(evicted.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(h.exists("/keep.pdf"));
    assert_eq!(h.state("/keep.pdf").await, Some(SyncState::Synced));
    assert!(h.engine.is_available_offline(&remote("/keep.pdf")));
}

#[tokio::test]
async fn test_unpinned_file_is_evicted_to_cloud_only() {
    let h = Harness::new().await;
    h.downloaded_file("/old.bin", b"evict me").await;
    h.engine.pin(&remote("/old.bin")).await.unwrap();
    assert_eq!(h.engine.unpin(&remote("/old.bin")).await.unwrap(), 1);

    let evicted = h.engine.enforce_cache_budget(0).await.unwrap();

    assert_eq!(evicted, vec![remote("/old.bin")]);
    assert!(!h.exists("/old.bin"));
    assert_eq!(h.state("/old.bin").await, Some(SyncState::CloudOnly));
    assert!(h.transport.contains("/old.bin"));
    assert_eq!(h.engine.cache_usage().used_bytes, 0);
}

#[tokio::test]
async fn test_budget_already_met_evicts_nothing() {
    let h = Harness::new().await;
    h.downloaded_file("/small.txt", b"tiny").await;

    assert!(h.engine.enforce_cache_budget(1024).await.unwrap().is_empty());
    assert!(h.exists("/small.txt"));
}

#[tokio::test]
async fn test_eviction_keeps_locally_modified_copy() {
    let h = Harness::new().await;
    h.downloaded_file("/draft.md", b"v1").await;
    h.write("/draft.md", b"v2 with more words");

    h.engine.enforce_cache_budget(0).await.unwrap();

    assert_eq!(h.read("/draft.md").as_deref(), Some(&b"v2 with more words"[..]));
    assert_eq!(h.state("/draft.md").await, Some(SyncState::Synced));
}

#[tokio::test]
async fn test_pinning_cloud_only_file_downloads_it() {
    let h = Harness::new().await;
    h.downloaded_file("/book.epub", b"chapter one").await;
    h.engine.enforce_cache_budget(0).await.unwrap();
    assert_eq!(h.state("/book.epub").await, Some(SyncState::CloudOnly));

    assert_eq!(h.engine.pin(&remote("/book.epub")).await.unwrap(), 1);
    assert_eq!(h.state("/book.epub").await, Some(SyncState::Downloading));
    h.settle().await;

    assert_eq!(h.read("/book.epub").as_deref(), Some(&b"chapter one"[..]));
    assert_eq!(h.state("/book.epub").await, Some(SyncState::Synced));
    assert!(h.engine.is_available_offline(&remote("/book.epub")));
}

#[tokio::test]
async fn test_pin_unknown_path_is_rejected() {
    let h = Harness::new().await;
    let err = h.engine.pin(&remote("/missing")).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownPath(_)));
}
