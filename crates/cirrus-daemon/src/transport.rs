//! Directory-backed transport
//!
//! [`DirectoryTransport`] implements [`ITransport`] over a plain directory,
//! standing in for a remote object store: another mount, a network share or
//! simply a second folder on the same disk. Object ids are assigned on first
//! sight and follow moves; fingerprints are SHA-256 digests, cached by size
//! and modification time.
//!
//! Remote changes are found by walking the directory and diffing against the
//! previous walk. A cursor names the walk it was issued for; any other cursor
//! (for example one persisted by a previous run) gets the full listing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use cirrus_core::domain::{
    ChangeCursor, ChangeEvent, ChangeKind, FileHash, ItemKind, RemoteDescriptor, RemoteId,
    RemotePath, SyncFailure, SyncPath,
};
use cirrus_core::ports::{ChangeSet, ITransport, TransferProgress};

use crate::snapshot::{self, object_path, Entry, PARTIAL_SUFFIX};

const COPY_CHUNK_BYTES: usize = 64 * 1024;
/// How long a transfer waits before checking a zero allowance again
const STALLED_RECHECK: Duration = Duration::from_millis(200);

#[derive(Default)]
struct TransportState {
    ids: HashMap<RemotePath, RemoteId>,
    /// Fingerprints keyed by path, valid while size and mtime match
    hashes: HashMap<RemotePath, (Entry, FileHash)>,
    /// Descriptors from the last change scan
    last_scan: BTreeMap<RemotePath, RemoteDescriptor>,
    generation: u64,
}

impl TransportState {
    fn id_for(&mut self, path: &RemotePath) -> anyhow::Result<RemoteId> {
        if let Some(id) = self.ids.get(path) {
            return Ok(id.clone());
        }
        let id = RemoteId::new(uuid::Uuid::new_v4().simple().to_string())?;
        self.ids.insert(path.clone(), id.clone());
        Ok(id)
    }

    fn forget(&mut self, prefix: &RemotePath) {
        self.ids.retain(|p, _| !p.starts_with(prefix));
        self.hashes.retain(|p, _| !p.starts_with(prefix));
    }

    fn rebase(&mut self, from: &RemotePath, to: &RemotePath) {
        let moved: Vec<RemotePath> = self.ids.keys().filter(|p| p.starts_with(from)).cloned().collect();
        for old in moved {
            if let (Some(id), Some(new)) = (self.ids.remove(&old), old.rebase(from, to)) {
                self.ids.insert(new, id);
            }
        }
        self.hashes.retain(|p, _| !p.starts_with(from));
    }

    fn cursor(&self) -> anyhow::Result<ChangeCursor> {
        Ok(ChangeCursor::new(format!("scan-{}", self.generation))?)
    }
}

/// [`ITransport`] over a local directory
pub struct DirectoryTransport {
    root: PathBuf,
    state: Mutex<TransportState>,
}

impl DirectoryTransport {
    /// Transport storing objects below `root`, which is created if missing
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create remote directory {}", root.display()))?;
        info!(root = %root.display(), "Directory transport ready");
        Ok(Self {
            root,
            state: Mutex::new(TransportState::default()),
        })
    }

    fn locate(&self, remote: &RemotePath) -> PathBuf {
        object_path(&self.root, remote)
    }

    async fn describe(
        &self,
        state: &mut TransportState,
        remote: &RemotePath,
        entry: &Entry,
    ) -> anyhow::Result<RemoteDescriptor> {
        let id = state.id_for(remote)?;
        if entry.kind == ItemKind::Folder {
            return Ok(RemoteDescriptor::folder(id, remote.clone(), entry.modified_at));
        }

        let fingerprint = match state.hashes.get(remote) {
            Some((seen, hash)) if seen == entry => hash.clone(),
            _ => {
                let hash = fingerprint_of(&self.locate(remote)).await?;
                state.hashes.insert(remote.clone(), (entry.clone(), hash.clone()));
                hash
            }
        };
        Ok(RemoteDescriptor::file(
            id,
            remote.clone(),
            entry.size,
            entry.modified_at,
            fingerprint,
        ))
    }

    /// Descriptor of the object at `remote`, failing with `NotFound` if absent
    async fn stat(&self, state: &mut TransportState, remote: &RemotePath) -> anyhow::Result<RemoteDescriptor> {
        let entry = entry_at(&self.locate(remote))
            .await?
            .ok_or_else(|| SyncFailure::NotFound(remote.to_string()))?;
        self.describe(state, remote, &entry).await
    }
}

async fn entry_at(path: &Path) -> anyhow::Result<Option<Entry>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let kind = if metadata.is_dir() {
        ItemKind::Folder
    } else {
        ItemKind::File
    };
    Ok(Some(Entry {
        kind,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified_at: snapshot::to_utc(metadata.modified()),
    }))
}

async fn fingerprint_of(path: &Path) -> anyhow::Result<FileHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(FileHash::from_digest(&hasher.finalize()))
}

/// Wait out the allowance for `bytes` at the transfer's current rate
async fn throttle(progress: &TransferProgress, bytes: usize) {
    loop {
        match progress.rate_limit() {
            None => return,
            Some(0) => tokio::time::sleep(STALLED_RECHECK).await,
            Some(rate) => {
                tokio::time::sleep(Duration::from_secs_f64(bytes as f64 / rate as f64)).await;
                return;
            }
        }
    }
}

/// Copy `from` to `to` through a partial file, honouring the rate limit
async fn copy_file(from: &Path, to: &Path, progress: &TransferProgress) -> anyhow::Result<u64> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = to.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let mut reader = tokio::fs::File::open(from).await?;
    let mut writer = tokio::fs::File::create(&partial).await?;
    let mut buffer = vec![0u8; COPY_CHUNK_BYTES];
    let mut copied = 0u64;
    let result: anyhow::Result<()> = async {
        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            throttle(progress, read).await;
            writer.write_all(&buffer[..read]).await?;
            copied += read as u64;
            progress.report(copied);
        }
        writer.flush().await?;
        Ok(())
    }
    .await;
    drop(writer);

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    tokio::fs::rename(&partial, to).await?;
    Ok(copied)
}

#[async_trait::async_trait]
impl ITransport for DirectoryTransport {
    #[instrument(skip(self, progress), fields(local = %local, remote = %remote))]
    async fn upload(
        &self,
        local: &SyncPath,
        remote: &RemotePath,
        progress: &TransferProgress,
    ) -> anyhow::Result<RemoteDescriptor> {
        let target = self.locate(remote);
        let source = entry_at(local.as_path())
            .await?
            .ok_or_else(|| SyncFailure::NotFound(local.to_string()))?;

        if source.kind == ItemKind::Folder {
            tokio::fs::create_dir_all(&target).await?;
        } else {
            let copied = copy_file(local.as_path(), &target, progress).await?;
            debug!(bytes = copied, "upload copied");
        }

        let mut state = self.state.lock().await;
        self.stat(&mut state, remote).await
    }

    #[instrument(skip(self, progress), fields(remote = %remote, local = %local))]
    async fn download(
        &self,
        remote: &RemotePath,
        local: &SyncPath,
        progress: &TransferProgress,
    ) -> anyhow::Result<()> {
        let source = self.locate(remote);
        let entry = entry_at(&source)
            .await?
            .ok_or_else(|| SyncFailure::NotFound(remote.to_string()))?;

        if entry.kind == ItemKind::Folder {
            tokio::fs::create_dir_all(local.as_path()).await?;
        } else {
            let copied = copy_file(&source, local.as_path(), progress).await?;
            debug!(bytes = copied, "download copied");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn delete(&self, remote: &RemotePath) -> anyhow::Result<()> {
        let target = self.locate(remote);
        let entry = entry_at(&target)
            .await?
            .ok_or_else(|| SyncFailure::NotFound(remote.to_string()))?;
        if entry.kind == ItemKind::Folder {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        self.state.lock().await.forget(remote);
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn move_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<RemoteDescriptor> {
        let source = self.locate(from);
        if entry_at(&source).await?.is_none() {
            return Err(SyncFailure::NotFound(from.to_string()).into());
        }
        let target = self.locate(to);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &target).await?;

        let mut state = self.state.lock().await;
        state.rebase(from, to);
        self.stat(&mut state, to).await
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn copy_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<RemoteDescriptor> {
        let source = self.locate(from);
        let entry = entry_at(&source)
            .await?
            .ok_or_else(|| SyncFailure::NotFound(from.to_string()))?;
        let progress = TransferProgress::unlimited(entry.size);
        let target = self.locate(to);

        if entry.kind == ItemKind::Folder {
            tokio::fs::create_dir_all(&target).await?;
            for (path, child) in snapshot::walk(&source).await? {
                let relative = path.as_str().trim_start_matches('/');
                if child.kind == ItemKind::Folder {
                    tokio::fs::create_dir_all(target.join(relative)).await?;
                } else {
                    copy_file(&source.join(relative), &target.join(relative), &progress).await?;
                }
            }
        } else {
            copy_file(&source, &target, &progress).await?;
        }

        let mut state = self.state.lock().await;
        self.stat(&mut state, to).await
    }

    async fn list_folder(&self, path: &RemotePath) -> anyhow::Result<Vec<RemoteDescriptor>> {
        let folder = self.locate(path);
        let mut entries = match tokio::fs::read_dir(&folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncFailure::NotFound(path.to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        let mut state = self.state.lock().await;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            let Ok(child) = path.join(&name) else {
                continue;
            };
            if let Some(found) = entry_at(&entry.path()).await? {
                children.push(self.describe(&mut state, &child, &found).await?);
            }
        }
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    #[instrument(skip(self))]
    async fn get_changes(&self, cursor: Option<&ChangeCursor>) -> anyhow::Result<ChangeSet> {
        let walked = snapshot::walk(&self.root).await?;
        let mut state = self.state.lock().await;

        let mut current = BTreeMap::new();
        for (path, entry) in &walked {
            // Vanished since the walk; the next scan reports the deletion
            let Ok(descriptor) = self.describe(&mut state, path, entry).await else {
                continue;
            };
            current.insert(path.clone(), descriptor);
        }

        let incremental = cursor.is_some_and(|c| state.generation > 0 && state.cursor().is_ok_and(|own| own == *c));
        let previous = if incremental {
            std::mem::take(&mut state.last_scan)
        } else {
            BTreeMap::new()
        };

        let changes: Vec<ChangeEvent> = snapshot::diff(&previous, &current)
            .into_iter()
            .map(|(kind, path)| {
                let descriptor = match kind {
                    ChangeKind::Deleted => None,
                    _ => current.get(&path).cloned(),
                };
                ChangeEvent::remote(kind, path, descriptor)
            })
            .collect();

        state.last_scan = current;
        state.generation += 1;
        let cursor = state.cursor()?;
        debug!(changes = changes.len(), incremental, cursor = %cursor.as_str(), "Remote scan complete");
        Ok(ChangeSet {
            changes,
            cursor,
            has_more: false,
        })
    }
}
