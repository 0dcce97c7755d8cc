//! Events flowing into and out of the sync engine
//!
//! [`ChangeEvent`] is what the change feed delivers (local watcher or remote
//! change notifications). [`SyncEvent`] is what observers receive; the
//! engine publishes them without waiting for any acknowledgment.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictRecord;
use super::failure::SyncFailure;
use super::newtypes::{RemotePath, UniqueId};
use super::operation::OperationKind;
use super::remote::RemoteDescriptor;
use super::sync_item::SyncState;

// ============================================================================
// Change feed input
// ============================================================================

/// Which replica a change was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOrigin::Local => write!(f, "local"),
            ChangeOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// What happened to the path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// The item now at `path` used to live at `from`
    Moved { from: RemotePath },
}

/// A single observed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub origin: ChangeOrigin,
    pub kind: ChangeKind,
    pub path: RemotePath,
    pub observed_at: DateTime<Utc>,
    /// Remote metadata; present on remote creations, modifications and moves
    pub remote: Option<RemoteDescriptor>,
}

impl ChangeEvent {
    /// A change observed in the local tree
    #[must_use]
    pub fn local(kind: ChangeKind, path: RemotePath) -> Self {
        Self {
            origin: ChangeOrigin::Local,
            kind,
            path,
            observed_at: Utc::now(),
            remote: None,
        }
    }

    /// A change reported by the remote store
    #[must_use]
    pub fn remote(kind: ChangeKind, path: RemotePath, remote: Option<RemoteDescriptor>) -> Self {
        Self {
            origin: ChangeOrigin::Remote,
            kind,
            path,
            observed_at: Utc::now(),
            remote,
        }
    }

    /// Override the observation time
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == ChangeOrigin::Local
    }
}

// ============================================================================
// Engine state and progress
// ============================================================================

/// Lifecycle state of the engine as a whole
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Syncing,
    Paused,
    Error(String),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Syncing => write!(f, "syncing"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Aggregate progress of the current sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub total_items: u64,
    pub completed_items: u64,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub current_operation: Option<String>,
}

impl SyncProgress {
    /// Completed share in `[0.0, 1.0]`, by bytes when known, else by items
    #[must_use]
    pub fn completion_fraction(&self) -> f64 {
        let (done, total) = if self.total_bytes > 0 {
            (self.transferred_bytes, self.total_bytes)
        } else {
            (self.completed_items, self.total_items)
        };
        if total == 0 {
            return 1.0;
        }
        (done as f64 / total as f64).clamp(0.0, 1.0)
    }
}

// ============================================================================
// Observer output
// ============================================================================

/// How an item changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemChangeKind {
    Added,
    Modified,
    Deleted,
    StateChanged { from: SyncState, to: SyncState },
}

/// How a cache entry changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheUpdate {
    Cached,
    Removed,
    Updated,
}

/// Notification published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ItemChange {
        path: RemotePath,
        item_id: UniqueId,
        change: ItemChangeKind,
    },
    Progress(SyncProgress),
    ConflictDetected(Box<ConflictRecord>),
    OperationFailed {
        operation: OperationKind,
        path: RemotePath,
        failure: SyncFailure,
        terminal: bool,
    },
    EngineStateChanged(EngineState),
    SelectionChanged {
        path: RemotePath,
        selected: bool,
        affected_bytes: u64,
    },
    CacheUpdated {
        path: RemotePath,
        update: CacheUpdate,
        size: u64,
    },
    CacheOverBudget {
        used_bytes: u64,
        budget_bytes: u64,
    },
}

impl SyncEvent {
    /// Shorthand for a state change notification
    #[must_use]
    pub fn state_changed(path: RemotePath, item_id: UniqueId, from: SyncState, to: SyncState) -> Self {
        SyncEvent::ItemChange {
            path,
            item_id,
            change: ItemChangeKind::StateChanged { from, to },
        }
    }
}
