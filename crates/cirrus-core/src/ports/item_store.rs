//! Item store port (driven/secondary port)
//!
//! The item store is the single source of truth for item state. The engine
//! rebuilds its in-memory views (selection tree, pending queues) from it on
//! startup.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   don't need domain-level classification.
//! - Items are addressed by `UniqueId` and, for the change feed, by their
//!   logical `RemotePath`. Paths are unique among stored items.
//! - `update_item` is the atomic read-modify-write primitive: the closure
//!   runs against the stored item while the adapter holds it exclusively,
//!   and nothing is written if the closure fails.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{
    newtypes::{ChangeCursor, RemotePath, UniqueId},
    sync_item::{ItemKind, SyncState},
    ConflictRecord, DomainError, SyncItem,
};

/// Mutation applied by [`IItemStore::update_item`]
pub type ItemUpdate = Box<dyn FnOnce(&mut SyncItem) -> Result<(), DomainError> + Send>;

// ============================================================================
// ItemFilter
// ============================================================================

/// Filter criteria for querying sync items
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Only items in one of these states (empty matches all)
    pub states: Vec<SyncState>,
    /// Only items at or below this logical path
    pub path_prefix: Option<RemotePath>,
    /// Only items of this kind
    pub kind: Option<ItemKind>,
}

impl ItemFilter {
    /// Creates a new empty filter (matches all items)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state to the accepted set
    #[must_use]
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.states.push(state);
        self
    }

    /// Sets the path prefix filter
    #[must_use]
    pub fn with_path_prefix(mut self, prefix: RemotePath) -> Self {
        self.path_prefix = Some(prefix);
        self
    }

    /// Sets the kind filter
    #[must_use]
    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Returns true if `item` satisfies every criterion
    #[must_use]
    pub fn matches(&self, item: &SyncItem) -> bool {
        if !self.states.is_empty() && !self.states.contains(&item.state()) {
            return false;
        }
        if let Some(prefix) = &self.path_prefix {
            if !item.remote_path().starts_with(prefix) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if item.kind() != kind {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// IItemStore trait
// ============================================================================

/// Durable record of every synchronized item
#[async_trait::async_trait]
pub trait IItemStore: Send + Sync {
    /// Insert or replace an item
    async fn save_item(&self, item: &SyncItem) -> anyhow::Result<()>;

    /// Fetch an item by identifier
    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<SyncItem>>;

    /// Fetch an item by logical path
    async fn get_item_by_path(&self, path: &RemotePath) -> anyhow::Result<Option<SyncItem>>;

    /// All items matching `filter`, ordered by path
    async fn query_items(&self, filter: &ItemFilter) -> anyhow::Result<Vec<SyncItem>>;

    /// Remove an item; removing a missing item is not an error
    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()>;

    /// Atomically apply `update` to the stored item and return the result
    ///
    /// Fails if the item does not exist or the closure returns an error; in
    /// both cases the stored item is left untouched.
    async fn update_item(&self, id: &UniqueId, update: ItemUpdate) -> anyhow::Result<SyncItem>;

    /// Number of items per state
    async fn count_by_state(&self) -> anyhow::Result<HashMap<SyncState, u64>>;

    /// Insert or replace a conflict record (resolved ones are kept as history)
    async fn save_conflict(&self, record: &ConflictRecord) -> anyhow::Result<()>;

    /// Every conflict record that is not resolved yet
    async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<ConflictRecord>>;

    /// Persist the explicit folder selection flags
    async fn save_selection(&self, selection: &BTreeMap<RemotePath, bool>) -> anyhow::Result<()>;

    /// Load the explicit folder selection flags
    async fn load_selection(&self) -> anyhow::Result<BTreeMap<RemotePath, bool>>;

    /// Persist the remote change cursor
    async fn save_cursor(&self, cursor: &ChangeCursor) -> anyhow::Result<()>;

    /// Load the remote change cursor, if any
    async fn get_cursor(&self) -> anyhow::Result<Option<ChangeCursor>>;
}
