//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local
//! filesystem: reading and writing content, querying attributes and
//! computing content fingerprints.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Watching for changes is not part of this port; local changes reach the
//!   engine through the change feed.

use chrono::{DateTime, Utc};

use crate::domain::{
    newtypes::{FileHash, SyncPath},
    sync_item::ItemKind,
};

/// Attributes of an existing file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    pub kind: ItemKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub readonly: bool,
}

impl FileSystemState {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

/// Local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Read a whole file
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>>;

    /// Write a whole file, creating parent directories as needed
    async fn write_file(&self, path: &SyncPath, content: &[u8]) -> anyhow::Result<()>;

    /// Delete a file, or a directory with its contents; missing paths are ignored
    async fn delete(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Create a directory and its parents
    async fn create_dir_all(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Rename or move, creating the destination's parent directories
    async fn rename(&self, from: &SyncPath, to: &SyncPath) -> anyhow::Result<()>;

    /// Attributes of `path`, or `None` if nothing exists there
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<Option<FileSystemState>>;

    /// Fingerprint of a file's content
    async fn compute_fingerprint(&self, path: &SyncPath) -> anyhow::Result<FileHash>;

    /// Returns true if something exists at `path`
    async fn exists(&self, path: &SyncPath) -> anyhow::Result<bool> {
        Ok(self.get_state(path).await?.is_some())
    }
}
