//! Transport port (driven/secondary port)
//!
//! This module defines the interface to the remote object store. The engine
//! never speaks a wire protocol itself; it emits transfer intents through
//! this trait.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result`. Adapters should put a
//!   [`SyncFailure`](crate::domain::SyncFailure) in the error chain when they
//!   know the cause, so the retry scheduler can classify it exactly.
//! - Local paths are absolute [`SyncPath`]s, remote paths are logical
//!   [`RemotePath`]s. Uploading a directory creates an empty remote folder
//!   and downloading a folder creates an empty local directory.
//! - [`TransferProgress`] is shared between the engine and the adapter: the
//!   engine adjusts the rate limit while the transfer runs and the adapter
//!   reports transferred bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::{
    newtypes::{ChangeCursor, RemotePath, SyncPath, TransferId},
    ChangeEvent, RemoteDescriptor,
};

// ============================================================================
// Transfer progress
// ============================================================================

/// Rate value meaning "no limit"
pub const UNLIMITED_RATE: u64 = u64::MAX;

/// Live state of a single transfer, shared with the transport adapter
#[derive(Debug, Clone)]
pub struct TransferProgress {
    transfer_id: TransferId,
    total_bytes: u64,
    transferred: Arc<AtomicU64>,
    rate_limit: Arc<AtomicU64>,
}

impl TransferProgress {
    /// Create progress tracking for a transfer of `total_bytes`
    #[must_use]
    pub fn new(transfer_id: TransferId, total_bytes: u64, rate_limit: Arc<AtomicU64>) -> Self {
        Self {
            transfer_id,
            total_bytes,
            transferred: Arc::new(AtomicU64::new(0)),
            rate_limit,
        }
    }

    /// Progress tracking without any rate limit
    #[must_use]
    pub fn unlimited(total_bytes: u64) -> Self {
        Self::new(
            TransferId::new(),
            total_bytes,
            Arc::new(AtomicU64::new(UNLIMITED_RATE)),
        )
    }

    #[must_use]
    pub fn transfer_id(&self) -> &TransferId {
        &self.transfer_id
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes moved so far
    #[must_use]
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Record the number of bytes moved so far
    pub fn report(&self, transferred: u64) {
        self.transferred.store(transferred, Ordering::Relaxed);
    }

    /// Current allowance in bytes per second
    ///
    /// `None` means unlimited; `Some(0)` means the transfer should wait.
    #[must_use]
    pub fn rate_limit(&self) -> Option<u64> {
        match self.rate_limit.load(Ordering::Relaxed) {
            UNLIMITED_RATE => None,
            rate => Some(rate),
        }
    }
}

// ============================================================================
// Change sets
// ============================================================================

/// A page of remote changes
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Remote-origin change events, oldest first
    pub changes: Vec<ChangeEvent>,
    /// Cursor to pass to the next `get_changes` call
    pub cursor: ChangeCursor,
    /// True if more changes are immediately available
    pub has_more: bool,
}

// ============================================================================
// ITransport trait
// ============================================================================

/// Access to the remote object store
#[async_trait::async_trait]
pub trait ITransport: Send + Sync {
    /// Upload the local file or directory at `local` to `remote`
    async fn upload(
        &self,
        local: &SyncPath,
        remote: &RemotePath,
        progress: &TransferProgress,
    ) -> anyhow::Result<RemoteDescriptor>;

    /// Download `remote` into `local`, replacing any existing file
    async fn download(
        &self,
        remote: &RemotePath,
        local: &SyncPath,
        progress: &TransferProgress,
    ) -> anyhow::Result<()>;

    /// Delete a remote object (recursively for folders)
    async fn delete(&self, remote: &RemotePath) -> anyhow::Result<()>;

    /// Move or rename a remote object
    async fn move_item(&self, from: &RemotePath, to: &RemotePath)
        -> anyhow::Result<RemoteDescriptor>;

    /// Copy a remote object
    async fn copy_item(&self, from: &RemotePath, to: &RemotePath)
        -> anyhow::Result<RemoteDescriptor>;

    /// Direct children of a remote folder
    async fn list_folder(&self, path: &RemotePath) -> anyhow::Result<Vec<RemoteDescriptor>>;

    /// Changes since `cursor`; `None` returns the full current state
    async fn get_changes(&self, cursor: Option<&ChangeCursor>) -> anyhow::Result<ChangeSet>;
}
