//! Synchronization engine
//!
//! The [`SyncEngine`] keeps every tracked path's [`SyncItem`] consistent
//! with the local filesystem and the remote object store.
//!
//! ## Flow
//!
//! 1. **Observe**: local and remote [`ChangeEvent`]s are applied to the item
//!    they concern (see the `observe` submodule). This only updates state and
//!    queues transfers; it never waits for one.
//! 2. **Tick**: [`SyncEngine::tick`] replays deferred events, propagates
//!    local deletions, and starts queued uploads and downloads on the worker
//!    pool, bounded by `max_concurrent_transfers`.
//! 3. **Finish**: each transfer task re-locks its item and records the
//!    outcome, or schedules a retry with exponential backoff.
//!
//! ## Concurrency
//!
//! Every mutation of an item happens under its per-path lock
//! ([`ItemLocks`]). Transfers run without the lock; a transfer that was
//! cancelled or superseded while in flight is recognised by its
//! [`TransferId`] and its outcome is dropped.
//!
//! Events that arrive while an item is in flight, in conflict or paused
//! are deferred (latest per path and origin wins) and replayed once the
//! item settles.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use cirrus_cache::{CacheError, OfflineCacheManager};
use cirrus_conflict::{ConflictDetector, ConflictResolver, PolicyEngine};
use cirrus_core::{
    config::Config,
    domain::{
        CachePriority, CacheUpdate, CacheUsage, ChangeEvent, ChangeKind, ChangeOrigin,
        ConflictRecord, EngineState, ErrorInfo, FileHash, ItemChangeKind, OfflineCacheEntry,
        OperationKind, RemoteDescriptor, RemotePath, RetryableOperation, SyncEvent, SyncFailure,
        SyncItem, SyncPath, SyncProgress, SyncState, TransferId, UniqueId,
    },
    ports::{
        EncryptionKey, FileSystemState, IEncryption, IItemStore, ILocalFileSystem, ITransport,
        ItemFilter, TransferProgress,
    },
};

use crate::bandwidth::{BandwidthAllocator, Direction, TransferPriority};
use crate::error::SyncError;
use crate::events::{EventBus, DEFAULT_EVENT_CAPACITY};
use crate::locks::ItemLocks;
use crate::offline_queue::OfflineQueue;
use crate::retry::{ErrorClassifier, ErrorStatistics, RetryDecision, RetryPolicy, RetryQueue};
use crate::selective::FolderTree;

mod commands;
mod observe;

/// Longest single wait inside [`SyncEngine::run_until_idle`]
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Spacing of the periodic stale-cache sweep
const STALE_SWEEP_INTERVAL_SECS: i64 = 3600;

// ============================================================================
// Transfer bookkeeping
// ============================================================================

/// A transfer currently running on the worker pool
#[derive(Debug, Clone)]
struct ActiveTransfer {
    id: TransferId,
    direction: Direction,
    token: CancellationToken,
}

/// What the transport reported for a finished transfer
#[derive(Debug)]
enum TransferOutcome {
    Uploaded(RemoteDescriptor),
    Downloaded,
}

fn direction_of(state: SyncState) -> Option<Direction> {
    match state {
        SyncState::Uploading => Some(Direction::Upload),
        SyncState::Downloading => Some(Direction::Download),
        _ => None,
    }
}

/// The path an event is about before it is applied
fn subject_path(event: &ChangeEvent) -> &RemotePath {
    match &event.kind {
        ChangeKind::Moved { from } => from,
        _ => &event.path,
    }
}

/// Remote view of an item as last recorded
fn remote_descriptor_of(item: &SyncItem) -> Option<RemoteDescriptor> {
    item.remote_id().map(|id| RemoteDescriptor {
        id: id.clone(),
        path: item.remote_path().clone(),
        name: item.name().to_string(),
        kind: item.kind(),
        size: item.size(),
        modified_at: item.modified_at(),
        fingerprint: item.remote_fingerprint().cloned(),
    })
}

/// Local deletion recorded, remote deletion not yet done
fn awaiting_remote_delete(item: &SyncItem) -> bool {
    item.state().is_resting()
        && item
            .tombstone()
            .is_some_and(|t| t.local_absent && !t.remote_absent)
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Bidirectional synchronization engine
///
/// Share it as `Arc<SyncEngine>`: [`SyncEngine::tick`] spawns transfer
/// tasks that hold a reference to the engine.
///
/// ## Dependencies
///
/// - `transport`: remote object store (upload, download, delete, move, listing)
/// - `store`: durable item state, conflicts, selection and change cursor
/// - `filesystem`: local file I/O and fingerprints
/// - `encryption`: optional content encryption applied around transfers
pub struct SyncEngine {
    root: SyncPath,
    transport: Arc<dyn ITransport>,
    store: Arc<dyn IItemStore>,
    filesystem: Arc<dyn ILocalFileSystem>,
    encryption: Option<(Arc<dyn IEncryption>, EncryptionKey)>,
    encryption_enabled: bool,
    staging_dir: PathBuf,

    detector: ConflictDetector,
    resolver: ConflictResolver,
    policy: PolicyEngine,

    tree: RwLock<FolderTree>,
    cache: Arc<OfflineCacheManager>,
    retry: RetryQueue,
    bandwidth: BandwidthAllocator,
    locks: ItemLocks,
    events: EventBus,
    excludes: Vec<glob::Pattern>,

    state: Mutex<EngineState>,
    progress: Mutex<SyncProgress>,
    /// Latest postponed event per (origin, subject path)
    deferred: DashMap<(ChangeOrigin, RemotePath), ChangeEvent>,
    active: DashMap<RemotePath, ActiveTransfer>,
    /// Items paused by [`SyncEngine::pause`] rather than by the user
    engine_paused: DashSet<UniqueId>,
    offline_queue: OfflineQueue,
    online: AtomicBool,

    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    wake: Notify,
    transfer_timeout: Duration,
}

impl SyncEngine {
    /// Creates a new `SyncEngine` with the given ports
    ///
    /// Invalid exclusion patterns are skipped with a warning.
    ///
    /// # Errors
    /// Returns `SyncError::Domain` if the configured sync root is not absolute
    pub fn new(
        transport: Arc<dyn ITransport>,
        store: Arc<dyn IItemStore>,
        filesystem: Arc<dyn ILocalFileSystem>,
        config: &Config,
    ) -> Result<Self, SyncError> {
        let root = SyncPath::new(config.sync.resolved_root())?;
        let excludes = config
            .sync
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid exclusion pattern");
                    None
                }
            })
            .collect();

        let workers = config.sync.max_concurrent_transfers.max(1);
        info!(
            root = %root,
            workers,
            encryption = config.encryption.enabled,
            "Sync engine created"
        );

        Ok(Self {
            root,
            resolver: ConflictResolver::new(Arc::clone(&transport), Arc::clone(&filesystem)),
            transport,
            store,
            filesystem,
            encryption: None,
            encryption_enabled: config.encryption.enabled,
            staging_dir: config.encryption.resolved_staging_dir(),
            detector: ConflictDetector::from_config(&config.conflicts),
            policy: PolicyEngine::from_config(&config.conflicts),
            tree: RwLock::new(FolderTree::new()),
            cache: Arc::new(OfflineCacheManager::from_config(&config.offline)),
            retry: RetryQueue::new(RetryPolicy::from_config(&config.retry)),
            bandwidth: BandwidthAllocator::from_config(&config.bandwidth),
            locks: ItemLocks::new(),
            events: EventBus::new(DEFAULT_EVENT_CAPACITY),
            excludes,
            state: Mutex::new(EngineState::Idle),
            progress: Mutex::new(SyncProgress::default()),
            deferred: DashMap::new(),
            active: DashMap::new(),
            engine_paused: DashSet::new(),
            offline_queue: OfflineQueue::new(),
            online: AtomicBool::new(true),
            permits: Arc::new(Semaphore::new(workers)),
            tasks: TaskTracker::new(),
            wake: Notify::new(),
            transfer_timeout: config.sync.transfer_timeout(),
        })
    }

    /// Encrypt uploads and decrypt downloads with `encryption`
    ///
    /// Ignored unless encryption is enabled in the configuration.
    #[must_use]
    pub fn with_encryption(mut self, encryption: Arc<dyn IEncryption>, key: EncryptionKey) -> Self {
        if self.encryption_enabled {
            self.encryption = Some((encryption, key));
        } else {
            warn!("Encryption adapter supplied but encryption is disabled in the configuration");
        }
        self
    }

    /// Share an existing cache ledger, e.g. one restored from its index
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<OfflineCacheManager>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the retry policy built from the configuration
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryQueue::new(policy);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start (or restart) synchronization
    ///
    /// Rebuilds the folder tree from persisted items and selection, and
    /// returns items whose conflict resolution was interrupted to
    /// `Conflict`. Starting a paused engine resumes it.
    ///
    /// # Errors
    /// Returns an error if the item store cannot be read
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        match self.engine_state() {
            EngineState::Syncing => return Ok(()),
            EngineState::Paused => return self.resume().await,
            _ => {}
        }

        self.restore().await?;
        self.set_engine_state(EngineState::Syncing);
        self.wake.notify_one();
        info!("Synchronization started");
        Ok(())
    }

    async fn restore(&self) -> Result<(), SyncError> {
        let selection = self.store.load_selection().await?;
        let items = self.store.query_items(&ItemFilter::new()).await?;

        let mut tree = FolderTree::new();
        for item in items.iter().filter(|i| i.remote_id().is_some()) {
            if item.is_folder() {
                tree.ensure_folder(item.remote_path());
            } else {
                tree.record_file(item.remote_path(), item.size());
            }
        }
        tree.apply_selection(&selection);
        *self.tree.write().await = tree;

        for item in items {
            if !(item.state().is_transferring() && item.conflict().is_some()) {
                continue;
            }
            let _guard = self.locks.lock(item.remote_path()).await;
            let Some(mut item) = self.store.get_item_by_path(item.remote_path()).await? else {
                continue;
            };
            let previous = item.state();
            if item.abort_resolution().is_ok() {
                warn!(path = %item.remote_path(), "Interrupted conflict resolution returned to conflict");
                self.persist(&item, previous).await?;
            }
        }
        Ok(())
    }

    /// Stop starting transfers and suspend queued ones
    ///
    /// Transfers already running finish normally.
    ///
    /// # Errors
    /// Returns `SyncError::InvalidEngineState` unless the engine is syncing
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<(), SyncError> {
        match self.engine_state() {
            EngineState::Syncing => {}
            EngineState::Paused => return Ok(()),
            other => {
                return Err(SyncError::InvalidEngineState {
                    command: "pause",
                    state: other.to_string(),
                })
            }
        }
        self.set_engine_state(EngineState::Paused);

        let mut paused = 0usize;
        for queued in self.queued_transfers().await? {
            let path = queued.remote_path().clone();
            let _guard = self.locks.lock(&path).await;
            let Some(mut item) = self.store.get_item_by_path(&path).await? else {
                continue;
            };
            if !item.state().is_transferring() || item.conflict().is_some() || self.active.contains_key(&path) {
                continue;
            }
            let previous = item.state();
            item.pause()?;
            self.engine_paused.insert(*item.id());
            self.persist(&item, previous).await?;
            paused += 1;
        }
        info!(paused, active = self.active.len(), "Synchronization paused");
        Ok(())
    }

    /// Resume after [`SyncEngine::pause`]
    ///
    /// # Errors
    /// Returns `SyncError::InvalidEngineState` if the engine is in error
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<(), SyncError> {
        match self.engine_state() {
            EngineState::Syncing => return Ok(()),
            EngineState::Paused | EngineState::Idle => {}
            other @ EngineState::Error(_) => {
                return Err(SyncError::InvalidEngineState {
                    command: "resume",
                    state: other.to_string(),
                })
            }
        }

        let ids: Vec<UniqueId> = self.engine_paused.iter().map(|id| *id).collect();
        for id in ids {
            self.engine_paused.remove(&id);
            let Some(item) = self.store.get_item(&id).await? else {
                continue;
            };
            let _guard = self.locks.lock(item.remote_path()).await;
            let Some(mut item) = self.store.get_item(&id).await? else {
                continue;
            };
            if item.state() != SyncState::Paused {
                continue;
            }
            let previous = item.state();
            item.resume()?;
            self.persist(&item, previous).await?;
        }

        self.set_engine_state(EngineState::Syncing);
        self.wake.notify_one();
        info!("Synchronization resumed");
        Ok(())
    }

    /// Cancel running transfers and wait for their tasks to end
    ///
    /// Cancelled items return to the state they had before the transfer.
    ///
    /// # Errors
    /// Returns an error if an item cannot be saved
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), SyncError> {
        self.set_engine_state(EngineState::Idle);

        let running: Vec<RemotePath> = self.active.iter().map(|e| e.key().clone()).collect();
        for path in running {
            let _guard = self.locks.lock(&path).await;
            if !self.abort_active(&path) {
                continue;
            }
            if let Some(mut item) = self.store.get_item_by_path(&path).await? {
                if item.state().is_transferring() && item.conflict().is_none() {
                    let previous = item.state();
                    item.cancel_transfer()?;
                    self.persist(&item, previous).await?;
                }
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
        info!("Synchronization stopped");
        Ok(())
    }

    /// Exclude one item from synchronization until [`SyncEngine::resume_item`]
    ///
    /// A running transfer of the item is interrupted.
    ///
    /// # Errors
    /// Returns `SyncError::UnknownPath` for untracked paths and
    /// `SyncError::Domain` for items in conflict
    #[instrument(skip(self), fields(path = %path))]
    pub async fn pause_item(&self, path: &RemotePath) -> Result<(), SyncError> {
        let _guard = self.locks.lock(path).await;
        let mut item = self.load(path).await?;
        if item.state() == SyncState::Paused {
            return Ok(());
        }

        let previous = item.state();
        item.pause()?;
        self.abort_active(path);
        self.persist(&item, previous).await?;
        info!("Item paused");
        Ok(())
    }

    /// Undo [`SyncEngine::pause_item`]
    ///
    /// # Errors
    /// Returns `SyncError::UnknownPath` for untracked paths and
    /// `SyncError::Domain` if the item is not paused
    #[instrument(skip(self), fields(path = %path))]
    pub async fn resume_item(&self, path: &RemotePath) -> Result<(), SyncError> {
        let _guard = self.locks.lock(path).await;
        let mut item = self.load(path).await?;
        let previous = item.state();
        item.resume()?;
        self.engine_paused.remove(item.id());
        self.persist(&item, previous).await?;
        self.wake.notify_one();
        info!(state = %item.state(), "Item resumed");
        Ok(())
    }

    /// Drop the queued or running transfer of `path`
    ///
    /// The item returns to the state it had before the transfer was queued.
    ///
    /// # Errors
    /// Returns `SyncError::NotCancellable` if nothing is queued for the path
    #[instrument(skip(self), fields(path = %path))]
    pub async fn cancel(&self, path: &RemotePath) -> Result<(), SyncError> {
        let _guard = self.locks.lock(path).await;
        let mut item = self.load(path).await?;
        if item.conflict().is_some() {
            return Err(SyncError::NotCancellable(path.clone()));
        }

        let previous = item.state();
        if item.cancel_transfer().is_err() {
            return Err(SyncError::NotCancellable(path.clone()));
        }
        let was_running = self.abort_active(path);
        self.retry.clear(path);
        self.engine_paused.remove(item.id());
        self.persist(&item, previous).await?;
        info!(was_running, state = %item.state(), "Transfer cancelled");
        Ok(())
    }

    /// Report network reachability
    ///
    /// While offline, local changes are queued instead of applied and no
    /// transfer starts. When the network comes back, the queued changes are
    /// applied in order. Returns the number of replayed changes.
    ///
    /// # Errors
    /// Returns an error if the item store fails while replaying
    #[instrument(skip(self))]
    pub async fn set_network_available(&self, available: bool) -> Result<usize, SyncError> {
        let was_online = self.online.swap(available, Ordering::SeqCst);
        if !available {
            if was_online {
                warn!("Network unavailable, local changes will be queued");
            }
            return Ok(0);
        }
        if was_online {
            return Ok(0);
        }

        let queued = self.offline_queue.drain();
        let replayed = queued.len();
        info!(queued = replayed, "Network available again, replaying local changes");
        for event in queued {
            let path = event.path.clone();
            if let Err(e) = self.observe(event).await {
                error!(path = %path, error = %e, "Failed to apply queued change");
            }
        }
        self.wake.notify_one();
        Ok(replayed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Sync state of the item at `path`, `None` if untracked
    ///
    /// # Errors
    /// Returns an error if the item store fails
    pub async fn get_state(&self, path: &RemotePath) -> Result<Option<SyncState>, SyncError> {
        Ok(self.store.get_item_by_path(path).await?.map(|i| i.state()))
    }

    /// The item tracked at `path`
    ///
    /// # Errors
    /// Returns an error if the item store fails
    pub async fn get_item(&self, path: &RemotePath) -> Result<Option<SyncItem>, SyncError> {
        Ok(self.store.get_item_by_path(path).await?)
    }

    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    #[must_use]
    pub fn progress(&self) -> SyncProgress {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Conflicts still waiting for a decision
    ///
    /// # Errors
    /// Returns an error if the item store fails
    pub async fn pending_conflicts(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        Ok(self.store.get_unresolved_conflicts().await?)
    }

    #[must_use]
    pub fn cache_usage(&self) -> CacheUsage {
        self.cache.usage()
    }

    /// Whether a local copy of `path` is on disk
    #[must_use]
    pub fn is_available_offline(&self, path: &RemotePath) -> bool {
        self.cache.is_available_offline(path)
    }

    /// Every selected folder
    pub async fn selected_paths(&self) -> BTreeSet<RemotePath> {
        self.tree.read().await.selected_paths()
    }

    /// Whether `path` is synchronized locally
    pub async fn is_selected(&self, path: &RemotePath) -> bool {
        self.tree.read().await.is_selected(path)
    }

    /// Remote bytes under `paths`, nested paths counted once
    pub async fn estimated_size(&self, paths: &[RemotePath]) -> u64 {
        self.tree.read().await.estimated_size(paths)
    }

    /// Operations waiting for a retry
    #[must_use]
    pub fn pending_retries(&self) -> Vec<RetryableOperation> {
        self.retry.pending()
    }

    #[must_use]
    pub fn error_statistics(&self) -> ErrorStatistics {
        self.retry.statistics()
    }

    /// Number of transfers running right now
    #[must_use]
    pub fn active_transfers(&self) -> usize {
        self.active.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn bandwidth(&self) -> &BandwidthAllocator {
        &self.bandwidth
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<OfflineCacheManager> {
        &self.cache
    }

    #[must_use]
    pub fn root(&self) -> &SyncPath {
        &self.root
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Resolves when a transfer finished or new work was queued
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one scheduling pass and return the number of transfers started
    ///
    /// Does nothing unless the engine is syncing and the network is up.
    ///
    /// # Errors
    /// Returns an error if the item store fails
    #[instrument(skip(self))]
    pub async fn tick(self: &Arc<Self>) -> Result<usize, SyncError> {
        if self.engine_state() != EngineState::Syncing || !self.is_online() {
            return Ok(0);
        }

        self.replay_deferred().await?;
        self.process_tombstones().await?;
        self.sweep_cache().await;
        self.locks.prune();

        let now = Utc::now();
        let mut queued = self.queued_transfers().await?;
        queued.sort_by(|a, b| {
            a.remote_path()
                .depth()
                .cmp(&b.remote_path().depth())
                .then_with(|| a.remote_path().cmp(b.remote_path()))
        });
        // Children wait until their folder exists remotely
        let pending_folders: Vec<RemotePath> = queued
            .iter()
            .filter(|i| i.is_folder() && i.state() == SyncState::Uploading)
            .map(|i| i.remote_path().clone())
            .collect();

        let mut started = 0;
        for item in &queued {
            let path = item.remote_path();
            if self.active.contains_key(path) || self.retry.is_waiting(path, now) {
                continue;
            }
            if pending_folders.iter().any(|folder| path.is_descendant_of(folder)) {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(queued = queued.len(), "All transfer workers busy");
                break;
            };
            if self.launch(path, permit).await? {
                started += 1;
            }
        }

        if queued.is_empty() && self.active.is_empty() {
            let mut progress = self
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if progress.total_items > 0 {
                *progress = SyncProgress::default();
            }
        }
        if started > 0 {
            debug!(started, "Transfers started");
        }
        Ok(started)
    }

    /// Tick until nothing is queued, in flight or awaiting remote deletion
    ///
    /// Conflicts do not count as outstanding work. Returns early if the
    /// engine stops syncing or goes offline.
    ///
    /// # Errors
    /// Returns the first store error hit by a tick
    pub async fn run_until_idle(self: &Arc<Self>) -> Result<(), SyncError> {
        loop {
            self.tick().await?;
            if self.engine_state() != EngineState::Syncing || !self.is_online() {
                return Ok(());
            }

            let queued = self.queued_transfers().await?;
            let tombstones = self.tombstoned().await?;
            if queued.is_empty() && tombstones.is_empty() && self.active.is_empty() {
                return Ok(());
            }

            let wait = self
                .retry
                .next_due()
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .map_or(IDLE_POLL, |d| d.min(IDLE_POLL));
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Replay deferred events whose item settled
    async fn replay_deferred(&self) -> Result<(), SyncError> {
        let mut pending: Vec<ChangeEvent> = self.deferred.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|e| e.observed_at);

        for event in pending {
            let subject = subject_path(&event).clone();
            let busy = match self.store.get_item_by_path(&subject).await? {
                Some(item) => self.is_busy(&item),
                None => false,
            };
            if busy {
                continue;
            }
            let key = (event.origin, subject);
            if self.deferred.remove_if(&key, |_, queued| *queued == event).is_some() {
                debug!(path = %event.path, origin = %event.origin, "Replaying deferred change");
                self.observe(event).await?;
            }
        }
        Ok(())
    }

    /// Items queued for upload or download, conflicts excluded
    async fn queued_transfers(&self) -> Result<Vec<SyncItem>, SyncError> {
        let filter = ItemFilter::new()
            .with_state(SyncState::Uploading)
            .with_state(SyncState::Downloading);
        Ok(self
            .store
            .query_items(&filter)
            .await?
            .into_iter()
            .filter(|i| i.conflict().is_none())
            .collect())
    }

    /// Items deleted locally whose remote deletion is outstanding
    async fn tombstoned(&self) -> Result<Vec<SyncItem>, SyncError> {
        let filter = ItemFilter::new()
            .with_state(SyncState::Synced)
            .with_state(SyncState::Error);
        let mut items: Vec<SyncItem> = self
            .store
            .query_items(&filter)
            .await?
            .into_iter()
            .filter(awaiting_remote_delete)
            .collect();
        items.sort_by_key(|i| i.remote_path().depth());
        Ok(items)
    }

    /// Propagate local deletions; returns how many are still outstanding
    async fn process_tombstones(&self) -> Result<usize, SyncError> {
        let now = Utc::now();
        let mut outstanding = 0;

        for candidate in self.tombstoned().await? {
            let path = candidate.remote_path().clone();
            if self.retry.is_waiting(&path, now) {
                outstanding += 1;
                continue;
            }

            let _guard = self.locks.lock(&path).await;
            let Some(mut item) = self.store.get_item_by_path(&path).await? else {
                continue;
            };
            if !awaiting_remote_delete(&item) {
                continue;
            }

            if item.remote_id().is_some() {
                if let Err(err) = self.transport.delete(&path).await {
                    let failure = ErrorClassifier::classify(&err);
                    if !matches!(failure, SyncFailure::NotFound(_)) {
                        if !self.record_delete_failure(&mut item, failure).await? {
                            outstanding += 1;
                        }
                        continue;
                    }
                }
            }

            item.mark_absent(false, true);
            self.forget(&item).await?;
            info!(path = %path, "Local deletion propagated to remote");
        }
        Ok(outstanding)
    }

    /// Returns true if the failure was terminal
    async fn record_delete_failure(&self, item: &mut SyncItem, failure: SyncFailure) -> Result<bool, SyncError> {
        let path = item.remote_path().clone();
        let operation = OperationKind::DeleteRemote;
        let decision = self
            .retry
            .record_failure(operation, &path, failure.clone(), Utc::now());
        let terminal = matches!(decision, RetryDecision::Terminal { .. });

        if terminal {
            // The remote copy stays; it comes back as a cloud-only item
            let previous = item.state();
            item.detach_local()?;
            self.persist(item, previous).await?;
            warn!(path = %path, failure = %failure, "Remote deletion refused, remote copy kept");
        }
        self.events.publish(SyncEvent::OperationFailed {
            operation,
            path,
            failure,
            terminal,
        });
        Ok(terminal)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Re-check the item under its lock and spawn its transfer
    async fn launch(self: &Arc<Self>, path: &RemotePath, permit: OwnedSemaphorePermit) -> Result<bool, SyncError> {
        let guard = self.locks.lock(path).await;
        let Some(item) = self.store.get_item_by_path(path).await? else {
            return Ok(false);
        };
        let Some(direction) = direction_of(item.state()) else {
            return Ok(false);
        };
        if item.conflict().is_some() || self.active.contains_key(path) {
            return Ok(false);
        }

        let transfer = ActiveTransfer {
            id: TransferId::new(),
            direction,
            token: CancellationToken::new(),
        };
        self.active.insert(path.clone(), transfer.clone());
        drop(guard);

        self.progress_started(&item, direction);
        info!(
            path = %path,
            direction = %direction,
            size = item.size(),
            transfer_id = %transfer.id,
            "Transfer started"
        );
        self.tasks.spawn(Arc::clone(self).run_transfer(item, transfer, permit));
        Ok(true)
    }

    async fn run_transfer(self: Arc<Self>, item: SyncItem, transfer: ActiveTransfer, _permit: OwnedSemaphorePermit) {
        let path = item.remote_path().clone();
        let priority = if item.is_offline() {
            TransferPriority::High
        } else {
            TransferPriority::Normal
        };
        let rate = self.bandwidth.allocate(transfer.id, transfer.direction, priority);
        let progress = TransferProgress::new(transfer.id, item.size(), rate);

        let result = tokio::select! {
            _ = transfer.token.cancelled() => Err(anyhow::Error::new(SyncFailure::Cancelled)),
            outcome = tokio::time::timeout(self.transfer_timeout, self.transfer_io(&item, &transfer, &progress)) => {
                outcome.unwrap_or_else(|elapsed| Err(elapsed.into()))
            }
        };
        self.bandwidth.release(&transfer.id);

        if transfer.token.is_cancelled() {
            debug!(path = %path, transfer_id = %transfer.id, "Transfer cancelled");
        } else if let Err(e) = self.finish_transfer(&item, &transfer, result).await {
            error!(path = %path, error = %e, "Failed to record transfer outcome");
        }
        self.wake.notify_one();
    }

    /// Move the bytes of `item`; folders never go through the cipher
    async fn transfer_io(
        &self,
        item: &SyncItem,
        transfer: &ActiveTransfer,
        progress: &TransferProgress,
    ) -> anyhow::Result<TransferOutcome> {
        let (local, remote) = (item.local_path(), item.remote_path());
        let seal = !item.is_folder();
        match transfer.direction {
            Direction::Upload => Ok(TransferOutcome::Uploaded(
                self.upload_bytes(local, remote, seal, &transfer.id, progress).await?,
            )),
            Direction::Download => {
                self.download_bytes(remote, local, seal, &transfer.id, progress).await?;
                Ok(TransferOutcome::Downloaded)
            }
        }
    }

    /// Upload `local`, encrypting it into a staging file first when `seal`
    /// is set and an encryption adapter is configured
    async fn upload_bytes(
        &self,
        local: &SyncPath,
        remote: &RemotePath,
        seal: bool,
        transfer: &TransferId,
        progress: &TransferProgress,
    ) -> anyhow::Result<RemoteDescriptor> {
        let Some((encryption, key)) = self.encryption.as_ref().filter(|_| seal) else {
            return self.transport.upload(local, remote, progress).await;
        };
        let staging = self.staging_path(transfer)?;
        let staged = async {
            let plaintext = self.filesystem.read_file(local).await?;
            let sealed = encryption.encrypt(&plaintext, key).await?;
            self.filesystem.write_file(&staging, &sealed).await?;
            self.transport.upload(&staging, remote, progress).await
        }
        .await;
        self.discard_staging(&staging).await;
        staged
    }

    /// Download `remote` into `local`, decrypting through a staging file
    /// when `seal` is set and an encryption adapter is configured
    async fn download_bytes(
        &self,
        remote: &RemotePath,
        local: &SyncPath,
        seal: bool,
        transfer: &TransferId,
        progress: &TransferProgress,
    ) -> anyhow::Result<()> {
        let Some((encryption, key)) = self.encryption.as_ref().filter(|_| seal) else {
            return self.transport.download(remote, local, progress).await;
        };
        let staging = self.staging_path(transfer)?;
        let staged = async {
            self.transport.download(remote, &staging, progress).await?;
            let sealed = self.filesystem.read_file(&staging).await?;
            let plaintext = encryption.decrypt(&sealed, key).await?;
            self.filesystem.write_file(local, &plaintext).await
        }
        .await;
        self.discard_staging(&staging).await;
        staged
    }

    fn staging_path(&self, transfer: &TransferId) -> anyhow::Result<SyncPath> {
        Ok(SyncPath::new(self.staging_dir.join(format!("{transfer}.part")))?)
    }

    async fn discard_staging(&self, staging: &SyncPath) {
        if let Err(e) = self.filesystem.delete(staging).await {
            warn!(path = %staging, error = %e, "Failed to remove staging file");
        }
    }

    /// Record the outcome of a transfer that was not cancelled
    async fn finish_transfer(
        &self,
        snapshot: &SyncItem,
        transfer: &ActiveTransfer,
        result: anyhow::Result<TransferOutcome>,
    ) -> Result<(), SyncError> {
        let path = snapshot.remote_path();
        let guard = self.locks.lock(path).await;

        let ours = self
            .active
            .remove_if(path, |_, running| running.id == transfer.id)
            .is_some();
        let current = self.store.get_item_by_path(path).await?;
        let Some(mut item) = current.filter(|i| {
            ours && i.id() == snapshot.id() && i.state() == snapshot.state() && i.conflict().is_none()
        }) else {
            debug!(path = %path, "Item changed during transfer, outcome discarded");
            return Ok(());
        };
        let previous = item.state();

        // A download only counts once the file is readable
        let result = match result {
            Ok(TransferOutcome::Downloaded) => match self.local_snapshot(item.local_path()).await {
                Ok(Some(local)) => Ok((None, Some(local))),
                Ok(None) => Err(anyhow::Error::new(SyncFailure::NotFound(item.local_path().to_string()))),
                Err(e) => Err(e),
            },
            Ok(TransferOutcome::Uploaded(descriptor)) => Ok((Some(descriptor), None)),
            Err(e) => Err(e),
        };

        let mut admitted = false;
        match result {
            Ok((uploaded, downloaded)) => {
                if let Some(descriptor) = uploaded {
                    item.complete_upload(&descriptor)?;
                    self.tree.write().await.insert_descriptor(&descriptor);
                }
                if let Some((state, fingerprint)) = downloaded {
                    item.complete_download(state.size, state.modified_at, fingerprint)?;
                }
                self.retry.clear(path);
                self.persist(&item, previous).await?;
                if transfer.direction == Direction::Download && !item.is_folder() {
                    self.admit(&item);
                    admitted = true;
                }
                self.progress_finished(item.size());
                info!(path = %path, direction = %transfer.direction, "Transfer completed");
            }
            Err(err) => {
                let operation = match transfer.direction {
                    Direction::Upload => OperationKind::Upload,
                    Direction::Download => OperationKind::Download,
                };
                self.record_transfer_failure(&mut item, operation, &err).await?;
            }
        }
        drop(guard);

        if admitted && self.cache.policy().auto_cleanup() && self.cache.needs_cleanup() {
            self.cleanup_cache().await;
        }
        Ok(())
    }

    async fn record_transfer_failure(
        &self,
        item: &mut SyncItem,
        operation: OperationKind,
        err: &anyhow::Error,
    ) -> Result<(), SyncError> {
        let failure = ErrorClassifier::classify(err);
        let path = item.remote_path().clone();
        let decision = self
            .retry
            .record_failure(operation, &path, failure.clone(), Utc::now());

        let terminal = match decision {
            RetryDecision::Retry { at, attempt } => {
                warn!(
                    path = %path,
                    operation = %operation,
                    failure = %failure,
                    attempt,
                    retry_at = %at,
                    "Transfer failed, retry scheduled"
                );
                false
            }
            RetryDecision::Terminal { attempts } => {
                error!(
                    path = %path,
                    operation = %operation,
                    failure = %failure,
                    attempts,
                    "Transfer failed permanently"
                );
                let previous = item.state();
                item.fail(ErrorInfo::new(failure.clone(), operation))?;
                self.persist(item, previous).await?;
                self.progress_finished(0);
                if matches!(failure, SyncFailure::AuthenticationFailed) {
                    self.set_engine_state(EngineState::Error(failure.to_string()));
                }
                true
            }
        };

        self.events.publish(SyncEvent::OperationFailed {
            operation,
            path,
            failure,
            terminal,
        });
        Ok(())
    }

    // ========================================================================
    // Cache upkeep
    // ========================================================================

    /// Periodic stale sweep and threshold cleanup
    async fn sweep_cache(&self) {
        if !self.cache.policy().auto_cleanup() {
            return;
        }
        let due = self.cache.needs_cleanup()
            || self.cache.last_cleanup().map_or(true, |at| {
                Utc::now() - at > chrono::Duration::seconds(STALE_SWEEP_INTERVAL_SECS)
            });
        if due {
            self.cleanup_cache().await;
        }
    }

    async fn cleanup_cache(&self) {
        match self.cache.run_cleanup(Utc::now()) {
            Ok(evicted) => self.release_evicted(evicted).await,
            Err(CacheError::BudgetUnreachable {
                used_bytes,
                budget_bytes,
                evicted,
            }) => {
                self.release_evicted(evicted).await;
                self.events.publish(SyncEvent::CacheOverBudget {
                    used_bytes,
                    budget_bytes,
                });
            }
            Err(e) => warn!(error = %e, "Cache cleanup failed"),
        }
    }

    /// Delete the local copies of evicted entries
    ///
    /// Only unchanged synced files lose their local copy; they become
    /// cloud-only and can be downloaded again.
    async fn release_evicted(&self, evicted: Vec<OfflineCacheEntry>) {
        for entry in evicted {
            let path = entry.path().clone();
            let _guard = self.locks.lock(&path).await;
            if let Err(e) = self.release_local_copy(&path).await {
                warn!(path = %path, error = %e, "Failed to release evicted local copy");
            }
            self.events.publish(SyncEvent::CacheUpdated {
                path,
                update: CacheUpdate::Removed,
                size: entry.size(),
            });
        }
    }

    async fn release_local_copy(&self, path: &RemotePath) -> Result<(), SyncError> {
        let Some(mut item) = self.store.get_item_by_path(path).await? else {
            return Ok(());
        };
        if item.state() != SyncState::Synced || item.is_folder() || item.remote_id().is_none() {
            return Ok(());
        }
        if self.locally_modified(&item).await? {
            debug!(path = %path, "Evicted file has unsynced changes, local copy kept");
            return Ok(());
        }

        self.filesystem.delete(item.local_path()).await?;
        let previous = item.state();
        item.detach_local()?;
        self.persist(&item, previous).await?;
        debug!(path = %path, "Local copy evicted");
        Ok(())
    }

    fn admit(&self, item: &SyncItem) {
        let update = self.cache.admit(
            *item.id(),
            item.remote_path().clone(),
            item.local_path().as_path().to_path_buf(),
            item.size(),
            CachePriority::Normal,
            Utc::now(),
        );
        self.events.publish(SyncEvent::CacheUpdated {
            path: item.remote_path().clone(),
            update,
            size: item.size(),
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(&self, path: &RemotePath) -> Result<SyncItem, SyncError> {
        self.store
            .get_item_by_path(path)
            .await?
            .ok_or_else(|| SyncError::UnknownPath(path.clone()))
    }

    /// Save `item` and announce a state change
    async fn persist(&self, item: &SyncItem, previous: SyncState) -> Result<(), SyncError> {
        if let Err(violation) = item.check_invariants() {
            warn!(path = %item.remote_path(), error = %violation, "Item invariant violated");
        }
        self.store.save_item(item).await?;
        if item.state() != previous {
            debug!(path = %item.remote_path(), from = %previous, to = %item.state(), "Item state changed");
            self.events.publish(SyncEvent::state_changed(
                item.remote_path().clone(),
                *item.id(),
                previous,
                item.state(),
            ));
        }
        Ok(())
    }

    async fn insert_item(&self, item: &SyncItem) -> Result<(), SyncError> {
        self.store.save_item(item).await?;
        self.publish_change(item, ItemChangeKind::Added);
        Ok(())
    }

    /// Drop every trace of `item`
    async fn forget(&self, item: &SyncItem) -> Result<(), SyncError> {
        let path = item.remote_path();
        self.store.delete_item(item.id()).await?;
        self.retry.clear(path);
        if let Some(entry) = self.cache.remove(path) {
            self.events.publish(SyncEvent::CacheUpdated {
                path: path.clone(),
                update: CacheUpdate::Removed,
                size: entry.size(),
            });
        }
        self.tree.write().await.remove(path);
        self.publish_change(item, ItemChangeKind::Deleted);
        debug!(path = %path, "Item forgotten");
        Ok(())
    }

    fn publish_change(&self, item: &SyncItem, change: ItemChangeKind) {
        self.events.publish(SyncEvent::ItemChange {
            path: item.remote_path().clone(),
            item_id: *item.id(),
            change,
        });
    }

    fn set_engine_state(&self, next: EngineState) {
        let changed = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state == next {
                false
            } else {
                *state = next.clone();
                true
            }
        };
        if changed {
            info!(state = %next, "Engine state changed");
            self.events.publish(SyncEvent::EngineStateChanged(next));
        }
    }

    fn progress_started(&self, item: &SyncItem, direction: Direction) {
        let retried = self.retry.contains(item.remote_path());
        let snapshot = {
            let mut progress = self
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !retried {
                progress.total_items += 1;
                progress.total_bytes += item.size();
            }
            progress.current_operation = Some(format!("{direction} {}", item.remote_path()));
            progress.clone()
        };
        self.events.publish(SyncEvent::Progress(snapshot));
    }

    fn progress_finished(&self, bytes: u64) {
        let snapshot = {
            let mut progress = self
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            progress.completed_items += 1;
            progress.transferred_bytes += bytes;
            if self.active.is_empty() {
                progress.current_operation = None;
            }
            progress.clone()
        };
        self.events.publish(SyncEvent::Progress(snapshot));
    }

    fn local_path(&self, path: &RemotePath) -> Result<SyncPath, SyncError> {
        Ok(self.root.resolve(path)?)
    }

    /// Id of the item tracked at the parent folder, if any
    async fn parent_id(&self, path: &RemotePath) -> Result<Option<UniqueId>, SyncError> {
        let Some(parent) = path.parent().filter(|p| !p.is_root()) else {
            return Ok(None);
        };
        Ok(self.store.get_item_by_path(&parent).await?.map(|i| *i.id()))
    }

    /// Events for busy items are deferred
    fn is_busy(&self, item: &SyncItem) -> bool {
        self.active.contains_key(item.remote_path())
            || matches!(item.state(), SyncState::Conflict | SyncState::Paused)
            || (item.state().is_transferring() && item.conflict().is_some())
    }

    fn is_excluded(&self, path: &RemotePath) -> bool {
        path.file_name()
            .is_some_and(|name| self.excludes.iter().any(|p| p.matches(name)))
    }

    /// Cancel the running transfer of `path`; returns true if one was running
    fn abort_active(&self, path: &RemotePath) -> bool {
        match self.active.remove(path) {
            Some((_, transfer)) => {
                transfer.token.cancel();
                self.bandwidth.release(&transfer.id);
                debug!(path = %path, transfer_id = %transfer.id, "Running transfer aborted");
                true
            }
            None => false,
        }
    }

    /// Current filesystem state and content fingerprint of `local`
    async fn local_snapshot(
        &self,
        local: &SyncPath,
    ) -> anyhow::Result<Option<(FileSystemState, Option<FileHash>)>> {
        let Some(state) = self.filesystem.get_state(local).await? else {
            return Ok(None);
        };
        let fingerprint = if state.is_directory() {
            None
        } else {
            Some(self.filesystem.compute_fingerprint(local).await?)
        };
        Ok(Some((state, fingerprint)))
    }

    /// True if the local file differs from what was last synchronized
    async fn locally_modified(&self, item: &SyncItem) -> Result<bool, SyncError> {
        if item.is_folder() {
            return Ok(false);
        }
        let Some((_, fingerprint)) = self.local_snapshot(item.local_path()).await? else {
            return Ok(false);
        };
        Ok(fingerprint.as_ref() != item.fingerprint()
            || item.modified_since_sync(self.detector.skew_tolerance()))
    }

    /// Tracked items strictly below `path`, deepest first
    async fn descendants(&self, path: &RemotePath) -> Result<Vec<SyncItem>, SyncError> {
        let mut items: Vec<SyncItem> = self
            .store
            .query_items(&ItemFilter::new().with_path_prefix(path.clone()))
            .await?
            .into_iter()
            .filter(|i| i.remote_path().is_descendant_of(path))
            .collect();
        items.sort_by(|a, b| b.remote_path().depth().cmp(&a.remote_path().depth()));
        Ok(items)
    }
}
