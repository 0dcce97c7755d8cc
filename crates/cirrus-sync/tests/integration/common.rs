//! Shared test doubles for sync engine integration tests
//!
//! The local side is a real directory under a `TempDir`, driven through
//! [`LocalFileSystemAdapter`]. The remote side is [`MemoryTransport`], an
//! in-memory object store that reads and writes the local files it is
//! handed, so transfers move real bytes.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use cirrus_cache::InMemoryItemStore;
use cirrus_core::config::{Config, ConfigBuilder};
use cirrus_core::domain::{
    ChangeCursor, ChangeEvent, ChangeKind, FileHash, RemoteDescriptor, RemoteId, RemotePath,
    SyncEvent, SyncFailure, SyncPath, SyncState,
};
use cirrus_core::ports::{ChangeSet, EncryptionKey, IEncryption, ITransport, TransferProgress};
use cirrus_sync::{LocalFileSystemAdapter, SyncEngine};

pub fn remote(path: &str) -> RemotePath {
    RemotePath::new(path.to_string()).unwrap()
}

pub fn fingerprint(content: &[u8]) -> FileHash {
    FileHash::from_digest(&Sha256::digest(content))
}

// ============================================================================
// MemoryTransport
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    descriptor: RemoteDescriptor,
    content: Vec<u8>,
}

/// Which transport call an injected failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Upload,
    Download,
    Delete,
}

/// In-memory remote object store
#[derive(Default)]
pub struct MemoryTransport {
    objects: Mutex<BTreeMap<RemotePath, StoredObject>>,
    next_id: AtomicU64,
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<(Call, SyncFailure)>>,
    upload_delay: Mutex<Option<Duration>>,
}

impl MemoryTransport {
    fn new_id(&self) -> RemoteId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        RemoteId::new(format!("obj-{n}")).unwrap()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self, call: Call) -> Option<SyncFailure> {
        let mut failures = self.failures.lock().unwrap();
        let index = failures.iter().position(|(c, _)| *c == call)?;
        failures.remove(index).map(|(_, failure)| failure)
    }

    /// Make the next `times` calls of kind `call` fail with `failure`
    pub fn fail_next(&self, call: Call, failure: SyncFailure, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back((call, failure.clone()));
        }
    }

    /// Hold every upload for `delay` before it completes
    pub fn delay_uploads(&self, delay: Option<Duration>) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    /// Calls made so far, e.g. `"upload /a.txt"`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Write a file on the remote side, as another client would
    pub fn put_file(&self, path: &str, content: &[u8]) -> RemoteDescriptor {
        let path = remote(path);
        let mut objects = self.objects.lock().unwrap();
        let id = match objects.get(&path) {
            Some(existing) => existing.descriptor.id.clone(),
            None => self.new_id(),
        };
        let descriptor = RemoteDescriptor::file(
            id,
            path.clone(),
            content.len() as u64,
            Utc::now(),
            fingerprint(content),
        );
        objects.insert(
            path,
            StoredObject {
                descriptor: descriptor.clone(),
                content: content.to_vec(),
            },
        );
        descriptor
    }

    pub fn put_folder(&self, path: &str) -> RemoteDescriptor {
        let descriptor = RemoteDescriptor::folder(self.new_id(), remote(path), Utc::now());
        self.objects.lock().unwrap().insert(
            remote(path),
            StoredObject {
                descriptor: descriptor.clone(),
                content: Vec::new(),
            },
        );
        descriptor
    }

    /// Delete an object on the remote side, as another client would
    pub fn remove(&self, path: &str) {
        let path = remote(path);
        self.objects
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(&path));
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&remote(path))
            .map(|o| o.content.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(&remote(path))
    }

    pub fn paths(&self) -> Vec<RemotePath> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ITransport for MemoryTransport {
    async fn upload(
        &self,
        local: &SyncPath,
        remote_path: &RemotePath,
        progress: &TransferProgress,
    ) -> anyhow::Result<RemoteDescriptor> {
        self.record(format!("upload {remote_path}"));
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.take_failure(Call::Upload) {
            return Err(failure.into());
        }

        let metadata = tokio::fs::metadata(local.as_path()).await?;
        let mut objects = self.objects.lock().unwrap();
        let id = match objects.get(remote_path) {
            Some(existing) => existing.descriptor.id.clone(),
            None => self.new_id(),
        };
        let (descriptor, content) = if metadata.is_dir() {
            (RemoteDescriptor::folder(id, remote_path.clone(), Utc::now()), Vec::new())
        } else {
            let content = std::fs::read(local.as_path())?;
            let descriptor = RemoteDescriptor::file(
                id,
                remote_path.clone(),
                content.len() as u64,
                Utc::now(),
                fingerprint(&content),
            );
            (descriptor, content)
        };
        progress.report(content.len() as u64);
        objects.insert(
            remote_path.clone(),
            StoredObject {
                descriptor: descriptor.clone(),
                content,
            },
        );
        Ok(descriptor)
    }

    async fn download(
        &self,
        remote_path: &RemotePath,
        local: &SyncPath,
        progress: &TransferProgress,
    ) -> anyhow::Result<()> {
        self.record(format!("download {remote_path}"));
        if let Some(failure) = self.take_failure(Call::Download) {
            return Err(failure.into());
        }

        let object = self
            .objects
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| SyncFailure::NotFound(remote_path.to_string()))?;
        if object.descriptor.is_folder() {
            tokio::fs::create_dir_all(local.as_path()).await?;
            return Ok(());
        }
        if let Some(parent) = local.as_path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local.as_path(), &object.content).await?;
        progress.report(object.content.len() as u64);
        Ok(())
    }

    async fn delete(&self, remote_path: &RemotePath) -> anyhow::Result<()> {
        self.record(format!("delete {remote_path}"));
        if let Some(failure) = self.take_failure(Call::Delete) {
            return Err(failure.into());
        }
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(remote_path) {
            return Err(SyncFailure::NotFound(remote_path.to_string()).into());
        }
        objects.retain(|p, _| !p.starts_with(remote_path));
        Ok(())
    }

    async fn move_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<RemoteDescriptor> {
        self.record(format!("move {from} -> {to}"));
        let mut objects = self.objects.lock().unwrap();
        let moved: Vec<RemotePath> = objects.keys().filter(|p| p.starts_with(from)).cloned().collect();
        if moved.is_empty() {
            return Err(SyncFailure::NotFound(from.to_string()).into());
        }
        for old in moved {
            let Some(target) = old.rebase(from, to) else {
                continue;
            };
            if let Some(mut object) = objects.remove(&old) {
                object.descriptor.name = target.file_name().unwrap_or_default().to_string();
                object.descriptor.path = target.clone();
                objects.insert(target, object);
            }
        }
        objects
            .get(to)
            .map(|o| o.descriptor.clone())
            .ok_or_else(|| SyncFailure::NotFound(to.to_string()).into())
    }

    async fn copy_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<RemoteDescriptor> {
        self.record(format!("copy {from} -> {to}"));
        let mut objects = self.objects.lock().unwrap();
        let mut object = objects
            .get(from)
            .cloned()
            .ok_or_else(|| SyncFailure::NotFound(from.to_string()))?;
        object.descriptor.id = self.new_id();
        object.descriptor.path = to.clone();
        object.descriptor.name = to.file_name().unwrap_or_default().to_string();
        let descriptor = object.descriptor.clone();
        objects.insert(to.clone(), object);
        Ok(descriptor)
    }

    async fn list_folder(&self, path: &RemotePath) -> anyhow::Result<Vec<RemoteDescriptor>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.descriptor.path.parent().as_ref() == Some(path))
            .map(|o| o.descriptor.clone())
            .collect())
    }

    async fn get_changes(&self, _cursor: Option<&ChangeCursor>) -> anyhow::Result<ChangeSet> {
        Ok(ChangeSet {
            changes: Vec::new(),
            cursor: ChangeCursor::new("0".to_string()).unwrap(),
            has_more: false,
        })
    }
}

// ============================================================================
// XorCipher
// ============================================================================

const NONCE_LEN: usize = 16;

/// Stream cipher over a SHA-256 keystream, with a random nonce prefix
pub struct XorCipher;

impl XorCipher {
    fn apply(data: &[u8], key: &EncryptionKey, nonce: &[u8]) -> Vec<u8> {
        data.chunks(32)
            .enumerate()
            .flat_map(|(block, chunk)| {
                let mut hasher = Sha256::new();
                hasher.update(key.as_bytes());
                hasher.update(nonce);
                hasher.update((block as u64).to_le_bytes());
                let stream = hasher.finalize();
                chunk
                    .iter()
                    .zip(stream.iter())
                    .map(|(b, k)| b ^ k)
                    .collect::<Vec<u8>>()
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl IEncryption for XorCipher {
    async fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> anyhow::Result<Vec<u8>> {
        let nonce = uuid::Uuid::new_v4();
        let mut sealed = nonce.as_bytes().to_vec();
        sealed.extend(Self::apply(plaintext, key, nonce.as_bytes()));
        Ok(sealed)
    }

    async fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey) -> anyhow::Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            anyhow::bail!("ciphertext shorter than its nonce");
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        Ok(Self::apply(body, key, nonce))
    }
}

pub fn test_key() -> EncryptionKey {
    EncryptionKey::new(b"integration-test-key".to_vec())
}

// ============================================================================
// Harness
// ============================================================================

/// Configuration with a sync root inside `dir`, millisecond retries and
/// no automatic conflict resolution
pub fn config_in(dir: &TempDir) -> ConfigBuilder {
    ConfigBuilder::new()
        .sync_root(dir.path().join("root"))
        .sync_max_concurrent_transfers(2)
        .sync_transfer_timeout_secs(30)
        .retry_base_delay_secs(0)
        .retry_max_delay_secs(0)
        .retry_max_attempts(3)
        .offline_cache_dir(dir.path().join("cache"))
        .encryption_staging_dir(dir.path().join("staging"))
}

/// An engine over a temporary sync root and a [`MemoryTransport`]
pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<SyncEngine>,
    pub transport: Arc<MemoryTransport>,
    pub store: Arc<InMemoryItemStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(|builder| builder).await
    }

    /// Started engine built from `config_in` adjusted by `configure`
    pub async fn build(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let dir = TempDir::new().unwrap();
        let config = configure(config_in(&dir)).build();
        Self::start(dir, &config, |engine| engine).await
    }

    /// Started engine over `config`, with `decorate` applied before start
    pub async fn start(dir: TempDir, config: &Config, decorate: impl FnOnce(SyncEngine) -> SyncEngine) -> Self {
        std::fs::create_dir_all(config.sync.resolved_root()).unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let store = Arc::new(InMemoryItemStore::new());
        let engine = SyncEngine::new(
            transport.clone(),
            store.clone(),
            Arc::new(LocalFileSystemAdapter::new()),
            config,
        )
        .unwrap();
        let engine = Arc::new(decorate(engine));
        engine.start().await.unwrap();

        Self {
            dir,
            engine,
            transport,
            store,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub fn local(&self, path: &str) -> PathBuf {
        self.root().join(path.trim_start_matches('/'))
    }

    /// Write a local file without telling the engine
    pub fn write(&self, path: &str, content: &[u8]) {
        let local = self.local(path);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(local, content).unwrap();
    }

    pub fn mkdir(&self, path: &str) {
        std::fs::create_dir_all(self.local(path)).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.local(path)).ok()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.local(path).exists()
    }

    /// Report a local change to the engine
    pub async fn local_event(&self, kind: ChangeKind, path: &str) {
        self.engine
            .observe(ChangeEvent::local(kind, remote(path)))
            .await
            .unwrap();
    }

    /// Report a remote change to the engine
    pub async fn remote_event(&self, kind: ChangeKind, descriptor: RemoteDescriptor) {
        let path = descriptor.path.clone();
        self.engine
            .observe(ChangeEvent::remote(kind, path, Some(descriptor)))
            .await
            .unwrap();
    }

    pub async fn remote_deleted(&self, path: &str) {
        self.engine
            .observe(ChangeEvent::remote(ChangeKind::Deleted, remote(path), None))
            .await
            .unwrap();
    }

    /// Write, report and fully synchronize a local file
    pub async fn synced_file(&self, path: &str, content: &[u8]) {
        self.write(path, content);
        self.local_event(ChangeKind::Created, path).await;
        self.settle().await;
        assert_eq!(self.state(path).await, Some(SyncState::Synced));
    }

    /// Put a remote file, report it and download it
    pub async fn downloaded_file(&self, path: &str, content: &[u8]) {
        let descriptor = self.transport.put_file(path, content);
        self.remote_event(ChangeKind::Created, descriptor).await;
        self.settle().await;
        assert_eq!(self.state(path).await, Some(SyncState::Synced));
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.engine.run_until_idle())
            .await
            .expect("engine did not go idle")
            .unwrap();
    }

    pub async fn state(&self, path: &str) -> Option<SyncState> {
        self.engine.get_state(&remote(path)).await.unwrap()
    }
}

/// Every event received so far
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
