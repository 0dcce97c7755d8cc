//! Conflict domain entities
//!
//! A [`ConflictRecord`] is attached to a `SyncItem` in the `conflict` state.
//! The set of resolution options is fixed by the conflict type at
//! construction and cannot be edited afterwards:
//!
//! ```text
//!   content ─► { keep_local, keep_remote, keep_both }
//!   name    ─► { keep_local, keep_remote, keep_both }
//!   type    ─► { keep_local, keep_remote }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ConflictId, FileHash, RemoteId, RemotePath, UniqueId};
use super::remote::RemoteDescriptor;
use super::sync_item::ItemKind;

/// Classification of a divergence between the local and remote copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides edited the content since the last common sync
    Content,
    /// The same remote object carries a different name than the local copy
    Name,
    /// One side is a file and the other a folder
    Type,
}

impl ConflictType {
    /// The resolution options valid for this conflict type
    #[must_use]
    pub fn options(&self) -> &'static [ResolutionOption] {
        match self {
            ConflictType::Content | ConflictType::Name => &[
                ResolutionOption::KeepLocal,
                ResolutionOption::KeepRemote,
                ResolutionOption::KeepBoth,
            ],
            ConflictType::Type => &[ResolutionOption::KeepLocal, ResolutionOption::KeepRemote],
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::Content => write!(f, "content"),
            ConflictType::Name => write!(f, "name"),
            ConflictType::Type => write!(f, "type"),
        }
    }
}

/// A way to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOption {
    /// Overwrite the remote copy with the local one
    KeepLocal,
    /// Overwrite the local copy with the remote one
    KeepRemote,
    /// Keep both under distinct names
    KeepBoth,
}

impl fmt::Display for ResolutionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionOption::KeepLocal => write!(f, "keep_local"),
            ResolutionOption::KeepRemote => write!(f, "keep_remote"),
            ResolutionOption::KeepBoth => write!(f, "keep_both"),
        }
    }
}

/// Who settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Chosen explicitly by the user
    User,
    /// Picked by a configured automatic strategy
    Policy,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::User => write!(f, "user"),
            ResolutionSource::Policy => write!(f, "policy"),
        }
    }
}

/// One side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Logical path of this version
    pub path: RemotePath,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub fingerprint: Option<FileHash>,
}

impl From<&RemoteDescriptor> for VersionInfo {
    fn from(remote: &RemoteDescriptor) -> Self {
        Self {
            path: remote.path.clone(),
            name: remote.name.clone(),
            kind: remote.kind,
            size: remote.size,
            modified_at: remote.modified_at,
            fingerprint: remote.fingerprint.clone(),
        }
    }
}

/// A detected conflict between the local and remote copy of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    id: ConflictId,
    item_id: UniqueId,
    conflict_type: ConflictType,
    local: VersionInfo,
    remote: VersionInfo,
    remote_id: RemoteId,
    options: Vec<ResolutionOption>,
    detected_at: DateTime<Utc>,
    resolution: Option<ResolutionOption>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<ResolutionSource>,
}

impl ConflictRecord {
    /// Create an unresolved record for `item_id`
    ///
    /// The resolution options are derived from `conflict_type`.
    #[must_use]
    pub fn new(
        item_id: UniqueId,
        conflict_type: ConflictType,
        local: VersionInfo,
        remote: &RemoteDescriptor,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            item_id,
            conflict_type,
            local,
            remote: VersionInfo::from(remote),
            remote_id: remote.id.clone(),
            options: conflict_type.options().to_vec(),
            detected_at: Utc::now(),
            resolution: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConflictId {
        &self.id
    }

    #[must_use]
    pub fn item_id(&self) -> &UniqueId {
        &self.item_id
    }

    #[must_use]
    pub fn conflict_type(&self) -> ConflictType {
        self.conflict_type
    }

    #[must_use]
    pub fn local(&self) -> &VersionInfo {
        &self.local
    }

    #[must_use]
    pub fn remote(&self) -> &VersionInfo {
        &self.remote
    }

    #[must_use]
    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    /// Logical path of the conflicted item (its local location)
    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.local.path
    }

    #[must_use]
    pub fn options(&self) -> &[ResolutionOption] {
        &self.options
    }

    /// Returns true if `option` is valid for this record
    #[must_use]
    pub fn offers(&self, option: ResolutionOption) -> bool {
        self.options.contains(&option)
    }

    #[must_use]
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    #[must_use]
    pub fn resolution(&self) -> Option<ResolutionOption> {
        self.resolution
    }

    #[must_use]
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    #[must_use]
    pub fn resolved_by(&self) -> Option<ResolutionSource> {
        self.resolved_by
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// The remote side as a descriptor, as last reported by the transport
    #[must_use]
    pub fn remote_descriptor(&self) -> RemoteDescriptor {
        RemoteDescriptor {
            id: self.remote_id.clone(),
            path: self.remote.path.clone(),
            name: self.remote.name.clone(),
            kind: self.remote.kind,
            size: self.remote.size,
            modified_at: self.remote.modified_at,
            fingerprint: self.remote.fingerprint.clone(),
        }
    }

    /// Mark the record as resolved
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` if the record is already
    /// resolved or does not offer `option`
    pub fn resolve(
        &mut self,
        option: ResolutionOption,
        source: ResolutionSource,
    ) -> Result<(), DomainError> {
        if self.is_resolved() {
            return Err(DomainError::ValidationFailed(format!(
                "conflict {} is already resolved",
                self.id
            )));
        }
        if !self.offers(option) {
            return Err(DomainError::ValidationFailed(format!(
                "{option} is not offered for a {} conflict",
                self.conflict_type
            )));
        }

        self.resolution = Some(option);
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(source);
        Ok(())
    }
}
