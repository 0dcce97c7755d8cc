//! SyncItem domain entity
//!
//! This module defines the SyncItem entity which represents a file or folder
//! kept consistent between the local tree and the remote store.
//!
//! ## State Machine
//!
//! ```text
//!   ┌───────────┐            ┌───────────┐
//!   │ LocalOnly │──────┐     │ CloudOnly │
//!   └───────────┘      │     └───────────┘
//!                      ▼           │
//!               ┌───────────┐      ▼      ┌─────────────┐
//!      ┌───────►│ Uploading │  ┌──────────┴┐            │
//!      │        └───────────┘  │Downloading│◄───┐       │
//!      │              │        └───────────┘    │       │
//!      │              ├──────────┬──────┤       │       │
//!      │              ▼          ▼      ▼       │       │
//!      │        ┌────────┐ ┌──────────┐ ┌─────┐ │       │
//!      ├────────│ Synced │ │ Conflict │ │Error│─┤ retry │
//!      │        └────────┘ └──────────┘ └─────┘ │       │
//!      │                        │               │       │
//!      └────────────────────────┴── resolve ────┘       │
//!                                                       │
//!   any state ──► Paused ──► state before the pause ────┘
//! ```
//!
//! Entering `Conflict` requires a [`ConflictRecord`] and leaving it goes
//! through [`SyncItem::begin_resolution`] or [`SyncItem::resolve_conflict`].
//! Cancelling a transfer restores the state the item had before the transfer
//! started, without passing through `Error`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::{ConflictRecord, VersionInfo};
use super::errors::DomainError;
use super::failure::SyncFailure;
use super::newtypes::{FileHash, RemoteId, RemotePath, SyncPath, UniqueId};
use super::operation::OperationKind;
use super::remote::RemoteDescriptor;

// ============================================================================
// Item kind and state
// ============================================================================

/// Whether an item is a regular file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Folder => write!(f, "folder"),
        }
    }
}

/// Synchronization state of an item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Exists only locally, never uploaded
    #[default]
    LocalOnly,
    /// Exists only remotely, not materialized locally
    CloudOnly,
    /// Upload queued or in flight
    Uploading,
    /// Download queued or in flight
    Downloading,
    /// Both replicas agree
    Synced,
    /// Replicas diverged and need a resolution
    Conflict,
    /// The last operation failed permanently
    Error,
    /// Synchronization of this item is suspended
    Paused,
}

impl SyncState {
    /// Stable lowercase name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::LocalOnly => "local_only",
            SyncState::CloudOnly => "cloud_only",
            SyncState::Uploading => "uploading",
            SyncState::Downloading => "downloading",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
            SyncState::Error => "error",
            SyncState::Paused => "paused",
        }
    }

    /// Returns true for `Uploading` and `Downloading`
    #[must_use]
    pub fn is_transferring(&self) -> bool {
        matches!(self, SyncState::Uploading | SyncState::Downloading)
    }

    /// Returns true for states that accept new events without deferral
    #[must_use]
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            SyncState::LocalOnly | SyncState::CloudOnly | SyncState::Synced | SyncState::Error
        )
    }

    /// Returns true if the item needs user attention
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        matches!(self, SyncState::Conflict | SyncState::Error)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Error info and tombstones
// ============================================================================

/// Details of the failure that put an item into the `Error` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    failure: SyncFailure,
    operation: OperationKind,
    occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(failure: SyncFailure, operation: OperationKind) -> Self {
        Self {
            failure,
            operation,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failure(&self) -> &SyncFailure {
        &self.failure
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.failure.to_string()
    }

    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.failure)
    }
}

/// Deletion marker; the item is removed once both sides confirm absence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub local_absent: bool,
    pub remote_absent: bool,
    pub marked_at: DateTime<Utc>,
}

impl Tombstone {
    /// True when neither replica holds the item any more
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.local_absent && self.remote_absent
    }
}

// ============================================================================
// SyncItem
// ============================================================================

/// A file or folder under synchronization
///
/// `size`, `modified_at` and `fingerprint` describe the local copy (or the
/// content last downloaded into it). `remote_fingerprint` is the remote
/// store's fingerprint at the last successful sync and is used to recognize
/// remote notifications that carry no new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    id: UniqueId,
    remote_id: Option<RemoteId>,
    local_path: SyncPath,
    remote_path: RemotePath,
    name: String,
    kind: ItemKind,
    size: u64,
    modified_at: DateTime<Utc>,
    fingerprint: Option<FileHash>,
    remote_fingerprint: Option<FileHash>,
    state: SyncState,
    parent_id: Option<UniqueId>,
    selected: bool,
    offline: bool,
    last_sync: Option<DateTime<Utc>>,
    conflict: Option<ConflictRecord>,
    paused_from: Option<SyncState>,
    pre_transfer: Option<TransferOrigin>,
    error: Option<ErrorInfo>,
    tombstone: Option<Tombstone>,
}

/// What an item looked like before its current transfer started
///
/// Restored by [`SyncItem::cancel_transfer`] so a replayed change is seen as
/// new again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TransferOrigin {
    state: SyncState,
    size: u64,
    modified_at: DateTime<Utc>,
    fingerprint: Option<FileHash>,
    remote_id: Option<RemoteId>,
    remote_fingerprint: Option<FileHash>,
    error: Option<ErrorInfo>,
}

impl SyncItem {
    /// Create an item first observed in the local tree
    ///
    /// # Errors
    /// Returns `DomainError::InvariantViolated` if a folder is given a
    /// fingerprint
    pub fn new_local(
        local_path: SyncPath,
        remote_path: RemotePath,
        kind: ItemKind,
        size: u64,
        modified_at: DateTime<Utc>,
        fingerprint: Option<FileHash>,
    ) -> Result<Self, DomainError> {
        if kind == ItemKind::Folder && fingerprint.is_some() {
            return Err(DomainError::InvariantViolated(format!(
                "folder {remote_path} cannot carry a fingerprint"
            )));
        }

        Ok(Self {
            id: UniqueId::new(),
            remote_id: None,
            name: remote_path.file_name().unwrap_or_default().to_string(),
            local_path,
            remote_path,
            kind,
            size: if kind == ItemKind::Folder { 0 } else { size },
            modified_at,
            fingerprint,
            remote_fingerprint: None,
            state: SyncState::LocalOnly,
            parent_id: None,
            selected: true,
            offline: false,
            last_sync: None,
            conflict: None,
            paused_from: None,
            pre_transfer: None,
            error: None,
            tombstone: None,
        })
    }

    /// Create an item first observed in the remote store
    #[must_use]
    pub fn from_remote(local_path: SyncPath, remote: &RemoteDescriptor) -> Self {
        Self {
            id: UniqueId::new(),
            remote_id: Some(remote.id.clone()),
            local_path,
            remote_path: remote.path.clone(),
            name: remote.name.clone(),
            kind: remote.kind,
            size: remote.size,
            modified_at: remote.modified_at,
            fingerprint: None,
            remote_fingerprint: remote.fingerprint.clone(),
            state: SyncState::CloudOnly,
            parent_id: None,
            selected: true,
            offline: false,
            last_sync: None,
            conflict: None,
            paused_from: None,
            pre_transfer: None,
            error: None,
            tombstone: None,
        }
    }

    // --- accessors ---

    #[must_use]
    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    #[must_use]
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    #[must_use]
    pub fn local_path(&self) -> &SyncPath {
        &self.local_path
    }

    #[must_use]
    pub fn remote_path(&self) -> &RemotePath {
        &self.remote_path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<&FileHash> {
        self.fingerprint.as_ref()
    }

    #[must_use]
    pub fn remote_fingerprint(&self) -> Option<&FileHash> {
        self.remote_fingerprint.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&UniqueId> {
        self.parent_id.as_ref()
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    #[must_use]
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    #[must_use]
    pub fn conflict(&self) -> Option<&ConflictRecord> {
        self.conflict.as_ref()
    }

    #[must_use]
    pub fn paused_from(&self) -> Option<SyncState> {
        self.paused_from
    }

    #[must_use]
    pub fn pre_transfer(&self) -> Option<SyncState> {
        self.pre_transfer.as_ref().map(|origin| origin.state)
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn tombstone(&self) -> Option<&Tombstone> {
        self.tombstone.as_ref()
    }

    /// Snapshot of the local side, as used in conflict records
    #[must_use]
    pub fn version_info(&self) -> VersionInfo {
        VersionInfo {
            path: self.remote_path.clone(),
            name: self.name.clone(),
            kind: self.kind,
            size: self.size,
            modified_at: self.modified_at,
            fingerprint: self.fingerprint.clone(),
        }
    }

    // --- plain mutators ---

    pub fn set_parent_id(&mut self, parent: Option<UniqueId>) {
        self.parent_id = parent;
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Record new local metadata after a local change
    pub fn apply_local_change(
        &mut self,
        size: u64,
        modified_at: DateTime<Utc>,
        fingerprint: Option<FileHash>,
    ) {
        if self.kind == ItemKind::File {
            self.size = size;
            self.fingerprint = fingerprint;
        }
        self.modified_at = modified_at;
    }

    /// Record the remote identity reported by the transport
    pub fn apply_remote(&mut self, remote: &RemoteDescriptor) {
        self.remote_id = Some(remote.id.clone());
        self.remote_fingerprint = remote.fingerprint.clone();
    }

    /// Move the item to a new logical location
    pub fn relocate(&mut self, local_path: SyncPath, remote_path: RemotePath) {
        self.name = remote_path.file_name().unwrap_or_default().to_string();
        self.local_path = local_path;
        self.remote_path = remote_path;
    }

    /// Mark one side of the item as deleted
    pub fn mark_absent(&mut self, local: bool, remote: bool) {
        let tombstone = self.tombstone.get_or_insert(Tombstone {
            local_absent: false,
            remote_absent: false,
            marked_at: Utc::now(),
        });
        tombstone.local_absent |= local;
        tombstone.remote_absent |= remote;
    }

    /// Drop a pending deletion marker
    pub fn clear_tombstone(&mut self) {
        self.tombstone = None;
    }

    /// True when the item was deleted on both sides and can be removed
    #[must_use]
    pub fn is_removable(&self) -> bool {
        self.tombstone.is_some_and(|t| t.is_complete())
    }

    /// True if the local copy changed after the last common sync point
    #[must_use]
    pub fn modified_since_sync(&self, tolerance: chrono::Duration) -> bool {
        match self.last_sync {
            Some(last_sync) => last_sync
                .checked_add_signed(tolerance)
                .is_some_and(|bound| self.modified_at > bound),
            None => true,
        }
    }
}

// ============================================================================
// State transition methods
// ============================================================================

impl SyncItem {
    /// Checks if a state transition is valid
    ///
    /// Entering `Conflict` additionally requires a record (see
    /// [`SyncItem::mark_conflict`]) and leaving it goes through the
    /// resolution methods, so `transition_to` refuses both.
    #[must_use]
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;

        match (self.state, target) {
            (Paused, Paused) => false,
            (Paused, to) => self.paused_from == Some(to),
            (_, Paused) => true,
            (LocalOnly, Uploading) | (CloudOnly, Downloading) => true,
            (Uploading | Downloading, Synced | Error | Conflict) => true,
            (Synced, Uploading | Downloading | Conflict) => true,
            (Error, Uploading | Downloading) => true,
            (Conflict, Uploading | Downloading | Synced) => true,
            _ => false,
        }
    }

    /// Attempts to transition to a new state
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the transition is not allowed.
    pub fn transition_to(&mut self, target: SyncState) -> Result<(), DomainError> {
        let leaves_conflict = self.state == SyncState::Conflict && target != SyncState::Paused;
        if target == SyncState::Conflict || leaves_conflict || !self.can_transition_to(target) {
            return Err(self.invalid(target));
        }
        self.enter(target);
        Ok(())
    }

    fn invalid(&self, target: SyncState) -> DomainError {
        DomainError::InvalidState {
            from: self.state.name().to_string(),
            to: target.name().to_string(),
        }
    }

    fn origin(&self) -> TransferOrigin {
        TransferOrigin {
            state: self.state,
            size: self.size,
            modified_at: self.modified_at,
            fingerprint: self.fingerprint.clone(),
            remote_id: self.remote_id.clone(),
            remote_fingerprint: self.remote_fingerprint.clone(),
            error: self.error.clone(),
        }
    }

    fn enter(&mut self, target: SyncState) {
        let from = self.state;

        if target == SyncState::Paused {
            self.paused_from = Some(from);
        } else if from == SyncState::Paused {
            self.paused_from = None;
        }

        if target.is_transferring() && !from.is_transferring() && from != SyncState::Paused {
            self.pre_transfer = Some(self.origin());
        }
        if !target.is_transferring() && target != SyncState::Paused {
            self.pre_transfer = None;
        }

        if from == SyncState::Error && target != SyncState::Paused {
            self.error = None;
        }

        if target == SyncState::Synced {
            self.last_sync = Some(Utc::now());
        }

        self.state = target;
    }

    /// Start an upload
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the item cannot upload now
    pub fn start_upload(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncState::Uploading)
    }

    /// Start a download
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the item cannot download now
    pub fn start_download(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncState::Downloading)
    }

    /// Start uploading a new local version
    ///
    /// The metadata is recorded after the transition, so cancelling the
    /// upload brings back the version that was last in sync.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the item cannot upload now
    pub fn start_upload_of(
        &mut self,
        size: u64,
        modified_at: DateTime<Utc>,
        fingerprint: Option<FileHash>,
    ) -> Result<(), DomainError> {
        self.start_upload()?;
        self.apply_local_change(size, modified_at, fingerprint);
        Ok(())
    }

    /// Start downloading the remote version described by `remote`
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the item cannot download now
    pub fn start_download_of(&mut self, remote: &RemoteDescriptor) -> Result<(), DomainError> {
        self.start_download()?;
        self.apply_remote(remote);
        Ok(())
    }

    /// Finish an upload with the descriptor returned by the transport
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless the item is uploading
    pub fn complete_upload(&mut self, remote: &RemoteDescriptor) -> Result<(), DomainError> {
        if self.state != SyncState::Uploading {
            return Err(self.invalid(SyncState::Synced));
        }
        self.apply_remote(remote);
        self.enter(SyncState::Synced);
        Ok(())
    }

    /// Finish a download, recording the metadata of the new local copy
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless the item is downloading
    pub fn complete_download(
        &mut self,
        size: u64,
        modified_at: DateTime<Utc>,
        fingerprint: Option<FileHash>,
    ) -> Result<(), DomainError> {
        if self.state != SyncState::Downloading {
            return Err(self.invalid(SyncState::Synced));
        }
        self.apply_local_change(size, modified_at, fingerprint);
        self.enter(SyncState::Synced);
        Ok(())
    }

    /// Record a terminal failure of the current transfer
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless a transfer is active
    pub fn fail(&mut self, error: ErrorInfo) -> Result<(), DomainError> {
        if !self.can_transition_to(SyncState::Error) || self.state == SyncState::Paused {
            return Err(self.invalid(SyncState::Error));
        }
        self.enter(SyncState::Error);
        self.error = Some(error);
        Ok(())
    }

    /// Cancel the current transfer and restore the state it started from
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless a transfer is active
    pub fn cancel_transfer(&mut self) -> Result<(), DomainError> {
        let active = self.state.is_transferring()
            || (self.state == SyncState::Paused && self.paused_from.is_some_and(|p| p.is_transferring()));
        let origin = if active { self.pre_transfer.take() } else { None };
        let Some(origin) = origin else {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: "cancelled".to_string(),
            });
        };

        self.state = origin.state;
        self.size = origin.size;
        self.modified_at = origin.modified_at;
        self.fingerprint = origin.fingerprint;
        self.remote_id = origin.remote_id;
        self.remote_fingerprint = origin.remote_fingerprint;
        self.error = origin.error;
        self.paused_from = None;
        Ok(())
    }

    /// Suspend synchronization of this item
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if already paused
    pub fn pause(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncState::Paused)
    }

    /// Return to the state held before [`SyncItem::pause`]
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the item is not paused
    pub fn resume(&mut self) -> Result<(), DomainError> {
        match (self.state, self.paused_from) {
            (SyncState::Paused, Some(previous)) => {
                self.state = previous;
                self.paused_from = None;
                Ok(())
            }
            _ => Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: "resumed".to_string(),
            }),
        }
    }

    /// Enter the conflict state with the detected record
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` from states that cannot conflict
    pub fn mark_conflict(&mut self, record: ConflictRecord) -> Result<(), DomainError> {
        if self.state == SyncState::Conflict || !self.can_transition_to(SyncState::Conflict) {
            return Err(self.invalid(SyncState::Conflict));
        }
        self.enter(SyncState::Conflict);
        self.pre_transfer = None;
        self.conflict = Some(record);
        Ok(())
    }

    /// Leave `Conflict` for the transfer state that realizes a resolution
    ///
    /// The record stays attached until [`SyncItem::resolve_conflict`] runs.
    /// If the plan fails, [`SyncItem::abort_resolution`] returns the item to
    /// `Conflict`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless the item is in conflict and
    /// `target` is a transfer state
    pub fn begin_resolution(&mut self, target: SyncState) -> Result<(), DomainError> {
        if self.state != SyncState::Conflict || !target.is_transferring() {
            return Err(self.invalid(target));
        }
        self.enter(target);
        Ok(())
    }

    /// Return to `Conflict` after a resolution plan failed
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless a resolution is running
    pub fn abort_resolution(&mut self) -> Result<(), DomainError> {
        if !self.state.is_transferring() || self.conflict.is_none() {
            return Err(self.invalid(SyncState::Conflict));
        }
        self.state = SyncState::Conflict;
        self.pre_transfer = None;
        Ok(())
    }

    /// Finish a resolution: clear the record and settle in `target`
    ///
    /// Returns the cleared record.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if there is no record or the item
    /// cannot move to `target`
    pub fn resolve_conflict(&mut self, target: SyncState) -> Result<ConflictRecord, DomainError> {
        if self.conflict.is_none() || target == SyncState::Conflict {
            return Err(self.invalid(target));
        }
        let allowed = match self.state {
            SyncState::Conflict => self.can_transition_to(target),
            s if s.is_transferring() => target == SyncState::Synced,
            _ => false,
        };
        if !allowed {
            return Err(self.invalid(target));
        }

        self.enter(target);
        self.conflict.take().ok_or_else(|| self.invalid(target))
    }

    /// Forget the remote copy and start over as a local-only item
    ///
    /// Used when the remote copy was deleted but the local copy changed
    /// after the last sync: local data is never discarded in that case.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` while a transfer, pause or
    /// conflict is pending
    pub fn detach_remote(&mut self) -> Result<(), DomainError> {
        if !self.state.is_resting() {
            return Err(self.invalid(SyncState::LocalOnly));
        }
        self.remote_id = None;
        self.remote_fingerprint = None;
        self.last_sync = None;
        self.error = None;
        self.tombstone = None;
        self.state = SyncState::LocalOnly;
        Ok(())
    }

    /// Forget the local copy and start over as a cloud-only item
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` while a transfer, pause or
    /// conflict is pending, or if the item has no remote identity
    pub fn detach_local(&mut self) -> Result<(), DomainError> {
        if !self.state.is_resting() || self.remote_id.is_none() {
            return Err(self.invalid(SyncState::CloudOnly));
        }
        self.fingerprint = None;
        self.error = None;
        self.tombstone = None;
        self.state = SyncState::CloudOnly;
        Ok(())
    }

    /// Verify the data-model invariants
    ///
    /// # Errors
    /// Returns `DomainError::InvariantViolated` naming the first broken rule
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let violation = |msg: &str| {
            Err(DomainError::InvariantViolated(format!(
                "{}: {msg}",
                self.remote_path
            )))
        };

        if self.state == SyncState::Synced && self.last_sync.is_none() {
            return violation("synced without a last sync timestamp");
        }
        if self.state == SyncState::LocalOnly && self.remote_id.is_some() {
            return violation("local-only item has a remote identifier");
        }
        if self.state == SyncState::Conflict && self.conflict.is_none() {
            return violation("conflict state without a conflict record");
        }
        if self.kind == ItemKind::Folder && self.fingerprint.is_some() {
            return violation("folder carries a fingerprint");
        }
        Ok(())
    }
}
