//! Content encryption around transfers

use std::sync::Arc;

use cirrus_core::domain::{ChangeKind, ResolutionOption, SyncState};
use cirrus_core::ports::IEncryption;

use crate::common::{config_in, remote, test_key, Harness, XorCipher};

async fn encrypted() -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(&dir).encryption_enabled(true).build();
    Harness::start(dir, &config, |engine| {
        engine.with_encryption(Arc::new(XorCipher), test_key())
    })
    .await
}

fn staging_is_empty(h: &Harness) -> bool {
    match std::fs::read_dir(h.dir.path().join("staging")) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn test_upload_stores_ciphertext_remotely() {
    let h = encrypted().await;
    h.write("/secret.txt", b"attack at dawn");
    h.local_event(ChangeKind::Created, "/secret.txt").await;
    h.settle().await;

    assert_eq!(h.state("/secret.txt").await, Some(SyncState::Synced));
    let stored = h.transport.content("/secret.txt").unwrap();
    assert_ne!(stored, b"attack at dawn");
    let opened = XorCipher.decrypt(&stored, &test_key()).await.unwrap();
    assert_eq!(opened, b"attack at dawn");

    assert_eq!(h.read("/secret.txt").as_deref(), Some(&b"attack at dawn"[..]));
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn test_download_writes_plaintext_locally() {
    let h = encrypted().await;
    let sealed = XorCipher.encrypt(b"meet me at noon", &test_key()).await.unwrap();
    let descriptor = h.transport.put_file("/note.txt", &sealed);

    h.remote_event(ChangeKind::Created, descriptor).await;
    h.settle().await;

    assert_eq!(h.state("/note.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/note.txt").as_deref(), Some(&b"meet me at noon"[..]));
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn test_folders_are_not_encrypted() {
    let h = encrypted().await;
    h.mkdir("/vault");
    h.local_event(ChangeKind::Created, "/vault").await;
    h.settle().await;

    assert_eq!(h.state("/vault").await, Some(SyncState::Synced));
    assert!(h.transport.contains("/vault"));
}

#[tokio::test]
async fn test_undecryptable_download_fails_the_item() {
    let h = encrypted().await;
    // Shorter than a nonce, so it cannot be ciphertext
    let descriptor = h.transport.put_file("/plain.txt", b"not sealed");

    h.remote_event(ChangeKind::Created, descriptor).await;
    h.settle().await;

    assert_eq!(h.state("/plain.txt").await, Some(SyncState::Error));
    assert!(!h.exists("/plain.txt"));
    assert!(staging_is_empty(&h));
}

/// A never-synced local file meeting a different remote file
async fn content_conflict(h: &Harness, path: &str, local: &[u8], remote: &[u8]) {
    h.write(path, local);
    let sealed = XorCipher.encrypt(remote, &test_key()).await.unwrap();
    let descriptor = h.transport.put_file(path, &sealed);
    h.remote_event(ChangeKind::Created, descriptor).await;
    assert_eq!(h.state(path).await, Some(SyncState::Conflict));
}

#[tokio::test]
async fn test_keep_local_resolution_uploads_ciphertext() {
    let h = encrypted().await;
    content_conflict(&h, "/plan.txt", b"local secret", b"remote secret").await;

    h.engine
        .resolve_conflict(&remote("/plan.txt"), ResolutionOption::KeepLocal)
        .await
        .unwrap();

    assert_eq!(h.state("/plan.txt").await, Some(SyncState::Synced));
    let stored = h.transport.content("/plan.txt").unwrap();
    assert_ne!(stored, b"local secret");
    let opened = XorCipher.decrypt(&stored, &test_key()).await.unwrap();
    assert_eq!(opened, b"local secret");
    assert!(staging_is_empty(&h));
}

#[tokio::test]
async fn test_keep_remote_resolution_writes_plaintext() {
    let h = encrypted().await;
    content_conflict(&h, "/plan.txt", b"local secret", b"remote secret").await;

    h.engine
        .resolve_conflict(&remote("/plan.txt"), ResolutionOption::KeepRemote)
        .await
        .unwrap();

    assert_eq!(h.state("/plan.txt").await, Some(SyncState::Synced));
    assert_eq!(h.read("/plan.txt").as_deref(), Some(&b"remote secret"[..]));
    assert!(staging_is_empty(&h));
}
