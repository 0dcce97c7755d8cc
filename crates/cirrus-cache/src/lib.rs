//! Cirrus Cache - Offline cache and item state storage
//!
//! Provides:
//! - The offline cache manager: pinning, access tracking, eviction scoring
//!   and budget enforcement
//! - An in-memory item store with JSON snapshots
//!
//! ## Architecture
//!
//! [`InMemoryItemStore`] implements the `IItemStore` port from `cirrus-core`.
//! It is a driven (secondary) adapter in the hexagonal architecture; hosts
//! that need durability persist it through [`InMemoryItemStore::save_to`].
//!
//! [`OfflineCacheManager`] only keeps the cache ledger. It decides what to
//! evict and returns the evicted entries; deleting the local copies is done
//! by the sync engine, which owns the item state.
//!
//! ## Key Components
//!
//! - [`OfflineCacheManager`] - Cache ledger, eviction and budget enforcement
//! - [`EvictionPolicy`] - Scoring and eligibility rules
//! - [`InMemoryItemStore`] - Full `IItemStore` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use cirrus_cache::{InMemoryItemStore, OfflineCacheManager};
//! use cirrus_core::config::OfflineConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = InMemoryItemStore::load_or_new("/tmp/cirrus/state.json").await?;
//! let cache = OfflineCacheManager::from_config(&OfflineConfig::default());
//! println!("{} cached files", cache.usage().item_count);
//! # drop(store);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod offline;

pub use memory::{InMemoryItemStore, StoreSnapshot};
pub use offline::{EvictionPolicy, OfflineCacheManager};

use cirrus_core::domain::OfflineCacheEntry;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Every evictable entry is gone and usage is still above the budget
    #[error("cache budget unreachable: {used_bytes} bytes used, budget {budget_bytes} bytes")]
    BudgetUnreachable {
        used_bytes: u64,
        budget_bytes: u64,
        /// Entries removed before giving up
        evicted: Vec<OfflineCacheEntry>,
    },

    /// Reading or writing a snapshot or index file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
