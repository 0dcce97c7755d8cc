//! Offline cache entries
//!
//! Tracks which files are kept available without network access and how
//! recently they were used.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{RemotePath, UniqueId};

/// Retention priority of a cached file
///
/// Lower priorities are evicted first; `Pinned` entries are never evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Pinned,
}

impl CachePriority {
    /// Position in the keep-order: pinned 0, high 1, normal 2, low 3
    #[must_use]
    pub fn sort_order(&self) -> u8 {
        match self {
            CachePriority::Pinned => 0,
            CachePriority::High => 1,
            CachePriority::Normal => 2,
            CachePriority::Low => 3,
        }
    }

    #[must_use]
    pub fn is_evictable(&self) -> bool {
        !matches!(self, CachePriority::Pinned)
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePriority::Low => write!(f, "low"),
            CachePriority::Normal => write!(f, "normal"),
            CachePriority::High => write!(f, "high"),
            CachePriority::Pinned => write!(f, "pinned"),
        }
    }
}

/// One file held in the offline cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineCacheEntry {
    item_id: UniqueId,
    path: RemotePath,
    cache_path: PathBuf,
    size: u64,
    cached_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    priority: CachePriority,
}

impl OfflineCacheEntry {
    /// Create an entry cached at `now`
    #[must_use]
    pub fn new(
        item_id: UniqueId,
        path: RemotePath,
        cache_path: PathBuf,
        size: u64,
        priority: CachePriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id,
            path,
            cache_path,
            size,
            cached_at: now,
            last_accessed: now,
            priority,
        }
    }

    #[must_use]
    pub fn item_id(&self) -> &UniqueId {
        &self.item_id
    }

    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    #[must_use]
    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    #[must_use]
    pub fn priority(&self) -> CachePriority {
        self.priority
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.priority == CachePriority::Pinned
    }

    /// Record an access; never moves `last_accessed` before `cached_at`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now.max(self.cached_at).max(self.last_accessed);
    }

    pub fn set_priority(&mut self, priority: CachePriority) {
        self.priority = priority;
    }

    /// Follow the item to a new location
    pub fn relocate(&mut self, path: RemotePath, cache_path: PathBuf) {
        self.path = path;
        self.cache_path = cache_path;
    }

    /// Replace the cached content, keeping the access history
    pub fn update_content(&mut self, size: u64, now: DateTime<Utc>) {
        self.size = size;
        self.touch(now);
    }
}

/// Aggregate usage of the offline cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUsage {
    pub used_bytes: u64,
    pub item_count: usize,
    pub pinned_bytes: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}
