//! In-memory item store with JSON snapshots
//!
//! Implements [`IItemStore`] over maps guarded by a single `RwLock`. The
//! daemon persists the whole state as a [`StoreSnapshot`] between runs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use cirrus_core::{
    domain::{ChangeCursor, ConflictId, ConflictRecord, RemotePath, SyncItem, SyncState, UniqueId},
    ports::{IItemStore, ItemFilter, ItemUpdate},
};

use crate::CacheError;

#[derive(Default)]
struct StoreState {
    items: HashMap<UniqueId, SyncItem>,
    by_path: BTreeMap<RemotePath, UniqueId>,
    conflicts: HashMap<ConflictId, ConflictRecord>,
    selection: BTreeMap<RemotePath, bool>,
    cursor: Option<ChangeCursor>,
}

impl StoreState {
    fn insert(&mut self, item: SyncItem) -> anyhow::Result<()> {
        if let Some(holder) = self.by_path.get(item.remote_path()) {
            if holder != item.id() {
                anyhow::bail!(
                    "path {} is already held by item {holder}",
                    item.remote_path()
                );
            }
        }
        if let Some(previous) = self.items.get(item.id()) {
            if previous.remote_path() != item.remote_path() {
                self.by_path.remove(previous.remote_path());
            }
        }
        self.by_path.insert(item.remote_path().clone(), *item.id());
        self.items.insert(*item.id(), item);
        Ok(())
    }
}

/// Serializable image of the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub items: Vec<SyncItem>,
    pub conflicts: Vec<ConflictRecord>,
    pub selection: BTreeMap<RemotePath, bool>,
    pub cursor: Option<ChangeCursor>,
}

/// [`IItemStore`] held in memory
#[derive(Default)]
pub struct InMemoryItemStore {
    state: RwLock<StoreState>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot
    ///
    /// # Errors
    /// Fails if two items in the snapshot share a path
    pub fn from_snapshot(snapshot: StoreSnapshot) -> anyhow::Result<Self> {
        let mut state = StoreState {
            selection: snapshot.selection,
            cursor: snapshot.cursor,
            ..StoreState::default()
        };
        for item in snapshot.items {
            state.insert(item)?;
        }
        for record in snapshot.conflicts {
            state.conflicts.insert(*record.id(), record);
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Copy of the current contents, items ordered by path
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        let items = state
            .by_path
            .values()
            .filter_map(|id| state.items.get(id).cloned())
            .collect();
        let mut conflicts: Vec<_> = state.conflicts.values().cloned().collect();
        conflicts.sort_by_key(|c| c.detected_at());
        StoreSnapshot {
            items,
            conflicts,
            selection: state.selection.clone(),
            cursor: state.cursor.clone(),
        }
    }

    /// Write a JSON snapshot to `path`
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let snapshot = self.snapshot().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, path).await?;
        debug!(path = %path.display(), items = snapshot.items.len(), "Saved item store");
        Ok(())
    }

    /// Read a JSON snapshot from `path`
    pub async fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        info!(path = %path.display(), items = snapshot.items.len(), "Loaded item store");
        Self::from_snapshot(snapshot)
    }

    /// Read `path` if it exists, otherwise start empty
    pub async fn load_or_new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load_from(path).await
        } else {
            debug!(path = %path.display(), "No item store snapshot, starting empty");
            Ok(Self::new())
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl IItemStore for InMemoryItemStore {
    async fn save_item(&self, item: &SyncItem) -> anyhow::Result<()> {
        self.state.write().await.insert(item.clone())
    }

    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<SyncItem>> {
        Ok(self.state.read().await.items.get(id).cloned())
    }

    async fn get_item_by_path(&self, path: &RemotePath) -> anyhow::Result<Option<SyncItem>> {
        let state = self.state.read().await;
        Ok(state
            .by_path
            .get(path)
            .and_then(|id| state.items.get(id))
            .cloned())
    }

    async fn query_items(&self, filter: &ItemFilter) -> anyhow::Result<Vec<SyncItem>> {
        let state = self.state.read().await;
        let candidates: Box<dyn Iterator<Item = &UniqueId> + '_> = match &filter.path_prefix {
            Some(prefix) => Box::new(
                state
                    .by_path
                    .range(prefix.clone()..)
                    .take_while(|(p, _)| p.as_str().starts_with(prefix.as_str()))
                    .map(|(_, id)| id),
            ),
            None => Box::new(state.by_path.values()),
        };

        Ok(candidates
            .filter_map(|id| state.items.get(id))
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }

    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(item) = state.items.remove(id) {
            state.by_path.remove(item.remote_path());
        }
        Ok(())
    }

    async fn update_item(&self, id: &UniqueId, update: ItemUpdate) -> anyhow::Result<SyncItem> {
        let mut state = self.state.write().await;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("item {id} not found"))?;
        update(&mut item)?;
        state.insert(item.clone())?;
        Ok(item)
    }

    async fn count_by_state(&self) -> anyhow::Result<HashMap<SyncState, u64>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for item in state.items.values() {
            *counts.entry(item.state()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .conflicts
            .insert(*record.id(), record.clone());
        Ok(())
    }

    async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<ConflictRecord>> {
        let state = self.state.read().await;
        let mut open: Vec<_> = state
            .conflicts
            .values()
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect();
        open.sort_by_key(|c| c.detected_at());
        Ok(open)
    }

    async fn save_selection(&self, selection: &BTreeMap<RemotePath, bool>) -> anyhow::Result<()> {
        self.state.write().await.selection = selection.clone();
        Ok(())
    }

    async fn load_selection(&self) -> anyhow::Result<BTreeMap<RemotePath, bool>> {
        Ok(self.state.read().await.selection.clone())
    }

    async fn save_cursor(&self, cursor: &ChangeCursor) -> anyhow::Result<()> {
        self.state.write().await.cursor = Some(cursor.clone());
        Ok(())
    }

    async fn get_cursor(&self) -> anyhow::Result<Option<ChangeCursor>> {
        Ok(self.state.read().await.cursor.clone())
    }
}
