//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: Uses write-to-temp + rename to avoid partial writes
//!   on crash or power loss.
//! - **Idempotent deletes**: Deleting a path that is already gone succeeds,
//!   so replayed deletions do not turn into failures.
//! - **SHA-256 fingerprints**: Files are hashed in chunks, so large files are
//!   never read into memory at once.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use cirrus_core::{
    domain::{FileHash, ItemKind, SyncPath},
    ports::{FileSystemState, ILocalFileSystem},
};

/// Read size used while hashing
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// This is a zero-sized struct because all operations derive their context
/// from the [`SyncPath`] arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn staging_path(target: &std::path::Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(".tmp");
    PathBuf::from(p)
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    time.ok()
        .and_then(|st| st.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path.as_path()).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, content), fields(path = %path, bytes = content.len()))]
    async fn write_file(&self, path: &SyncPath, content: &[u8]) -> anyhow::Result<()> {
        let target = path.as_path();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Same directory, so the rename stays on one filesystem
        let tmp_path = staging_path(target);
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, target).await?;

        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &SyncPath) -> anyhow::Result<()> {
        let p = path.as_path();
        let metadata = match tokio::fs::symlink_metadata(p).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("already absent");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(p).await?;
        } else {
            tokio::fs::remove_file(p).await?;
        }
        debug!(directory = metadata.is_dir(), "delete complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_dir_all(&self, path: &SyncPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path.as_path()).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &SyncPath, to: &SyncPath) -> anyhow::Result<()> {
        if let Some(parent) = to.as_path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from.as_path(), to.as_path()).await?;
        debug!("rename complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<Option<FileSystemState>> {
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let kind = if metadata.is_dir() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        Ok(Some(FileSystemState {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_at: to_utc(metadata.modified()),
            readonly: metadata.permissions().readonly(),
        }))
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn compute_fingerprint(&self, path: &SyncPath) -> anyhow::Result<FileHash> {
        let mut file = tokio::fs::File::open(path.as_path()).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_BYTES];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let hash = FileHash::from_digest(&hasher.finalize());
        debug!(hash = %hash, "fingerprint computed");
        Ok(hash)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sync_path(dir: &TempDir, name: &str) -> SyncPath {
        SyncPath::new(dir.path().join(name)).expect("temp dir paths are absolute")
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = sync_path(&dir, "a/b/nested.txt");

        fs.write_file(&path, b"first").await.unwrap();
        fs.write_file(&path, b"second").await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), b"second");
        assert!(!staging_path(path.as_path()).exists());
    }

    #[tokio::test]
    async fn test_delete_file_directory_and_missing_path() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let file = sync_path(&dir, "sub/file.txt");
        fs.write_file(&file, b"x").await.unwrap();

        fs.delete(&sync_path(&dir, "sub")).await.unwrap();
        assert!(!fs.exists(&file).await.unwrap());
        fs.delete(&sync_path(&dir, "sub")).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_state() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let file = sync_path(&dir, "data.bin");
        fs.write_file(&file, &[7u8; 1024]).await.unwrap();

        let state = fs.get_state(&file).await.unwrap().unwrap();
        assert_eq!(state.kind, ItemKind::File);
        assert_eq!(state.size, 1024);
        assert!(state.modified_at > DateTime::UNIX_EPOCH);

        let folder = fs.get_state(&sync_path(&dir, "")).await.unwrap().unwrap();
        assert!(folder.is_directory());
        assert!(fs.get_state(&sync_path(&dir, "nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_creates_target_parent() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let from = sync_path(&dir, "a.txt");
        let to = sync_path(&dir, "moved/b.txt");
        fs.write_file(&from, b"payload").await.unwrap();

        fs.rename(&from, &to).await.unwrap();
        assert!(!fs.exists(&from).await.unwrap());
        assert_eq!(fs.read_file(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let a = sync_path(&dir, "a.txt");
        let b = sync_path(&dir, "b.txt");
        fs.write_file(&a, b"same").await.unwrap();
        fs.write_file(&b, b"same").await.unwrap();

        let fa = fs.compute_fingerprint(&a).await.unwrap();
        assert_eq!(fa, fs.compute_fingerprint(&b).await.unwrap());
        assert_eq!(fa.as_str().len(), 64);

        fs.write_file(&b, b"different").await.unwrap();
        assert_ne!(fa, fs.compute_fingerprint(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_fingerprint_of_large_file_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = sync_path(&dir, "big.bin");
        let content = vec![3u8; HASH_CHUNK_BYTES * 2 + 17];
        fs.write_file(&path, &content).await.unwrap();

        let expected = FileHash::from_digest(&Sha256::digest(&content));
        assert_eq!(fs.compute_fingerprint(&path).await.unwrap(), expected);
    }
}
