//! Offline cache manager
//!
//! Keeps the ledger of files available without network access and decides
//! which of them to give up under storage pressure.
//!
//! ## Eviction
//!
//! ```text
//! score = days_since_access * 0.4 + size_mb * 0.3 + priority_rank * 0.3
//!
//! priority_rank: high 1, normal 2, low 3     pinned: -inf (never evicted)
//! ```
//!
//! An entry is eligible for eviction when it is not pinned and either it
//! was not accessed for `max_age_days` or the cache is over budget.
//! [`OfflineCacheManager::enforce_budget`] evicts eligible entries by
//! descending score until usage fits the budget.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cirrus_core::{
    config::OfflineConfig,
    domain::{CachePriority, CacheUpdate, CacheUsage, OfflineCacheEntry, RemotePath, UniqueId},
};

use crate::CacheError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const INDEX_FILE: &str = "index.json";

// ============================================================================
// EvictionPolicy
// ============================================================================

/// Scoring and eligibility rules for cache eviction
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    budget_bytes: u64,
    max_age: Duration,
    cleanup_threshold_percent: u8,
    auto_cleanup: bool,
}

impl EvictionPolicy {
    #[must_use]
    pub fn new(budget_bytes: u64, max_age: Duration, cleanup_threshold_percent: u8) -> Self {
        Self {
            budget_bytes,
            max_age,
            cleanup_threshold_percent: cleanup_threshold_percent.clamp(1, 100),
            auto_cleanup: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &OfflineConfig) -> Self {
        Self {
            auto_cleanup: config.auto_cleanup,
            ..Self::new(
                config.max_cache_bytes(),
                Duration::days(i64::from(config.max_age_days)),
                config.cleanup_threshold_percent,
            )
        }
    }

    #[must_use]
    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    #[must_use]
    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup
    }

    /// Eviction score of `entry` at `now`; higher is evicted first
    ///
    /// Pinned entries score negative infinity.
    #[must_use]
    pub fn score(&self, entry: &OfflineCacheEntry, now: DateTime<Utc>) -> f64 {
        if entry.is_pinned() {
            return f64::NEG_INFINITY;
        }
        let idle = (now - entry.last_accessed()).num_seconds().max(0) as f64;
        let days = idle / SECONDS_PER_DAY;
        let megabytes = entry.size() as f64 / BYTES_PER_MB;
        days * 0.4 + megabytes * 0.3 + f64::from(entry.priority().sort_order()) * 0.3
    }

    /// True if `entry` was not accessed for longer than the maximum age
    #[must_use]
    pub fn is_stale(&self, entry: &OfflineCacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_accessed() > self.max_age
    }

    /// True if `entry` may be evicted
    #[must_use]
    pub fn is_eligible(&self, entry: &OfflineCacheEntry, now: DateTime<Utc>, over_budget: bool) -> bool {
        entry.priority().is_evictable() && (over_budget || self.is_stale(entry, now))
    }

    /// True once `used_bytes` crossed the cleanup threshold
    #[must_use]
    pub fn needs_cleanup(&self, used_bytes: u64) -> bool {
        u128::from(used_bytes) * 100
            >= u128::from(self.budget_bytes) * u128::from(self.cleanup_threshold_percent)
    }
}

// ============================================================================
// OfflineCacheManager
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: Vec<OfflineCacheEntry>,
    pinned: Vec<RemotePath>,
    last_cleanup: Option<DateTime<Utc>>,
}

/// Ledger of cached files with pinning and eviction
pub struct OfflineCacheManager {
    entries: DashMap<RemotePath, OfflineCacheEntry>,
    /// Paths pinned by the user, cached or not yet
    pinned: DashSet<RemotePath>,
    policy: EvictionPolicy,
    cache_dir: PathBuf,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl OfflineCacheManager {
    pub fn new(policy: EvictionPolicy, cache_dir: PathBuf) -> Self {
        Self {
            entries: DashMap::new(),
            pinned: DashSet::new(),
            policy,
            cache_dir,
            last_cleanup: Mutex::new(None),
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(EvictionPolicy::from_config(config), config.resolved_cache_dir())
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    // --- ledger ---

    /// Record a file that was made available locally
    ///
    /// Pinned paths are admitted with [`CachePriority::Pinned`]; an existing
    /// entry keeps its priority and history and only gets the new size.
    pub fn admit(
        &self,
        item_id: UniqueId,
        path: RemotePath,
        cache_path: PathBuf,
        size: u64,
        priority: CachePriority,
        now: DateTime<Utc>,
    ) -> CacheUpdate {
        if let Some(mut entry) = self.entries.get_mut(&path) {
            entry.update_content(size, now);
            debug!(path = %path, size, "Cache entry updated");
            return CacheUpdate::Updated;
        }

        let priority = if self.pinned.contains(&path) {
            CachePriority::Pinned
        } else {
            priority
        };
        debug!(path = %path, size, priority = %priority, "Cache entry admitted");
        let entry = OfflineCacheEntry::new(item_id, path.clone(), cache_path, size, priority, now);
        self.entries.insert(path, entry);
        CacheUpdate::Cached
    }

    /// Drop the entry for `path`
    pub fn remove(&self, path: &RemotePath) -> Option<OfflineCacheEntry> {
        self.entries.remove(path).map(|(_, entry)| entry)
    }

    /// Entry for `path`, if cached
    pub fn get(&self, path: &RemotePath) -> Option<OfflineCacheEntry> {
        self.entries.get(path).map(|e| e.clone())
    }

    /// All entries, ordered by path
    pub fn entries(&self) -> Vec<OfflineCacheEntry> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.path().cmp(b.path()));
        all
    }

    /// Record an access to `path`; returns false if it is not cached
    pub fn touch(&self, path: &RemotePath, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(path) {
            Some(mut entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    /// True if a local copy of `path` is held
    pub fn is_available_offline(&self, path: &RemotePath) -> bool {
        self.entries.contains_key(path)
    }

    /// Follow a move of `from` (and everything below it) to `to`
    pub fn relocate(&self, from: &RemotePath, to: &RemotePath, cache_path_of: impl Fn(&RemotePath) -> PathBuf) {
        let moved: Vec<RemotePath> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(from))
            .map(|e| e.key().clone())
            .collect();

        for old in moved {
            let Some(new_path) = old.rebase(from, to) else {
                continue;
            };
            if let Some((_, mut entry)) = self.entries.remove(&old) {
                entry.relocate(new_path.clone(), cache_path_of(&new_path));
                self.entries.insert(new_path.clone(), entry);
            }
            if self.pinned.remove(&old).is_some() {
                self.pinned.insert(new_path);
            }
        }
    }

    // --- pinning ---

    /// Keep `path` available offline and exempt it from eviction
    ///
    /// Returns true if the file is already cached.
    pub fn pin(&self, path: &RemotePath) -> bool {
        self.pinned.insert(path.clone());
        match self.entries.get_mut(path) {
            Some(mut entry) => {
                entry.set_priority(CachePriority::Pinned);
                info!(path = %path, "Pinned cached file");
                true
            }
            None => {
                info!(path = %path, "Pinned file that is not cached yet");
                false
            }
        }
    }

    /// Make `path` evictable again at normal priority
    ///
    /// Returns true if the path was pinned.
    pub fn unpin(&self, path: &RemotePath) -> bool {
        let was_pinned = self.pinned.remove(path).is_some();
        if let Some(mut entry) = self.entries.get_mut(path) {
            if entry.is_pinned() {
                entry.set_priority(CachePriority::Normal);
            }
        }
        if was_pinned {
            info!(path = %path, "Unpinned file");
        }
        was_pinned
    }

    pub fn is_pinned(&self, path: &RemotePath) -> bool {
        self.pinned.contains(path)
    }

    /// Pinned paths, ordered
    pub fn pinned_paths(&self) -> Vec<RemotePath> {
        let mut paths: Vec<_> = self.pinned.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }

    // --- eviction ---

    /// Eviction score of `entry` now
    pub fn eviction_score(&self, entry: &OfflineCacheEntry) -> f64 {
        self.policy.score(entry, Utc::now())
    }

    /// Evict entries until usage is at or below `max_bytes`
    ///
    /// Returns the evicted entries. Pinned entries are never evicted; if the
    /// budget cannot be met without them, every evictable entry is gone and
    /// [`CacheError::BudgetUnreachable`] carries what was evicted.
    pub fn enforce_budget(
        &self,
        max_bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OfflineCacheEntry>, CacheError> {
        let mut used = self.used_bytes();
        if used <= max_bytes {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(f64, OfflineCacheEntry)> = self
            .entries
            .iter()
            .filter(|e| self.policy.is_eligible(e.value(), now, true))
            .map(|e| (self.policy.score(e.value(), now), e.value().clone()))
            .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut evicted = Vec::new();
        for (score, entry) in candidates {
            if used <= max_bytes {
                break;
            }
            if self.entries.remove(entry.path()).is_some() {
                debug!(path = %entry.path(), size = entry.size(), score, "Evicted from cache");
                used = used.saturating_sub(entry.size());
                evicted.push(entry);
            }
        }
        self.mark_cleanup(now);

        if used > max_bytes {
            warn!(
                used_bytes = used,
                budget_bytes = max_bytes,
                evicted = evicted.len(),
                "Cache budget unreachable without evicting pinned files"
            );
            return Err(CacheError::BudgetUnreachable {
                used_bytes: used,
                budget_bytes: max_bytes,
                evicted,
            });
        }

        info!(evicted = evicted.len(), used_bytes = used, "Cache budget enforced");
        Ok(evicted)
    }

    /// Evict every non-pinned entry not accessed within the maximum age
    pub fn cleanup_stale(&self, now: DateTime<Utc>) -> Vec<OfflineCacheEntry> {
        let stale: Vec<RemotePath> = self
            .entries
            .iter()
            .filter(|e| self.policy.is_eligible(e.value(), now, false))
            .map(|e| e.key().clone())
            .collect();

        let evicted: Vec<_> = stale.iter().filter_map(|p| self.remove(p)).collect();
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Removed stale cache entries");
        }
        self.mark_cleanup(now);
        evicted
    }

    /// Stale cleanup followed by budget enforcement against the configured budget
    pub fn run_cleanup(&self, now: DateTime<Utc>) -> Result<Vec<OfflineCacheEntry>, CacheError> {
        let mut evicted = self.cleanup_stale(now);
        match self.enforce_budget(self.policy.budget_bytes(), now) {
            Ok(more) => {
                evicted.extend(more);
                Ok(evicted)
            }
            Err(CacheError::BudgetUnreachable {
                used_bytes,
                budget_bytes,
                evicted: more,
            }) => {
                evicted.extend(more);
                Err(CacheError::BudgetUnreachable {
                    used_bytes,
                    budget_bytes,
                    evicted,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drop every entry at or below `prefix`, pinned or not
    ///
    /// Used when a folder is deselected: its local copies go away entirely.
    pub fn invalidate(&self, prefix: &RemotePath) -> Vec<OfflineCacheEntry> {
        let doomed: Vec<RemotePath> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        self.pinned.retain(|p| !p.starts_with(prefix));

        let removed: Vec<_> = doomed.iter().filter_map(|p| self.remove(p)).collect();
        if !removed.is_empty() {
            debug!(prefix = %prefix, removed = removed.len(), "Invalidated cache entries");
        }
        removed
    }

    // --- usage ---

    pub fn used_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size()).sum()
    }

    pub fn usage(&self) -> CacheUsage {
        let mut usage = CacheUsage {
            last_cleanup: self.last_cleanup(),
            ..CacheUsage::default()
        };
        for entry in self.entries.iter() {
            usage.used_bytes += entry.size();
            usage.item_count += 1;
            if entry.is_pinned() {
                usage.pinned_bytes += entry.size();
            }
        }
        usage
    }

    /// True once usage crossed the configured cleanup threshold
    pub fn needs_cleanup(&self) -> bool {
        self.policy.needs_cleanup(self.used_bytes())
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.last_cleanup.lock().map(|g| *g).unwrap_or(None)
    }

    fn mark_cleanup(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_cleanup.lock() {
            *guard = Some(now);
        }
    }

    // --- persistence ---

    /// Write the ledger to `<cache_dir>/index.json`
    pub async fn save_index(&self) -> Result<(), CacheError> {
        let index = CacheIndex {
            entries: self.entries(),
            pinned: self.pinned_paths(),
            last_cleanup: self.last_cleanup(),
        };
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let json = serde_json::to_vec_pretty(&index)?;
        tokio::fs::write(self.cache_dir.join(INDEX_FILE), json).await?;
        debug!(entries = index.entries.len(), "Saved cache index");
        Ok(())
    }

    /// Replace the ledger with `<cache_dir>/index.json`; a missing file is empty
    pub async fn load_index(&self) -> Result<usize, CacheError> {
        let path = self.cache_dir.join(INDEX_FILE);
        let index: CacheIndex = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => return Err(e.into()),
        };

        self.entries.clear();
        self.pinned.clear();
        let count = index.entries.len();
        for entry in index.entries {
            self.entries.insert(entry.path().clone(), entry);
        }
        for path in index.pinned {
            self.pinned.insert(path);
        }
        if let Some(at) = index.last_cleanup {
            self.mark_cleanup(at);
        }
        debug!(entries = count, "Loaded cache index");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn path(p: &str) -> RemotePath {
        RemotePath::new(p.to_string()).unwrap()
    }

    fn manager(budget_mb: u64) -> OfflineCacheManager {
        OfflineCacheManager::new(
            EvictionPolicy::new(budget_mb * MB, Duration::days(7), 80),
            PathBuf::from("/tmp/cirrus-cache"),
        )
    }

    fn admit(cache: &OfflineCacheManager, p: &str, size: u64, priority: CachePriority, at: DateTime<Utc>) {
        cache.admit(UniqueId::new(), path(p), PathBuf::from(p), size, priority, at);
    }

    mod score_tests {
        use super::*;

        #[test]
        fn test_pinned_scores_negative_infinity() {
            let policy = EvictionPolicy::new(MB, Duration::days(7), 80);
            let now = Utc::now();
            let entry = OfflineCacheEntry::new(
                UniqueId::new(),
                path("/a"),
                PathBuf::from("/a"),
                10 * MB,
                CachePriority::Pinned,
                now - Duration::days(300),
            );
            assert_eq!(policy.score(&entry, now), f64::NEG_INFINITY);
        }

        #[test]
        fn test_older_and_bigger_score_higher() {
            let policy = EvictionPolicy::new(MB, Duration::days(7), 80);
            let now = Utc::now();
            let entry = |size, age_days, priority| {
                OfflineCacheEntry::new(
                    UniqueId::new(),
                    path("/a"),
                    PathBuf::from("/a"),
                    size,
                    priority,
                    now - Duration::days(age_days),
                )
            };

            let fresh = policy.score(&entry(MB, 0, CachePriority::Normal), now);
            let old = policy.score(&entry(MB, 10, CachePriority::Normal), now);
            let big = policy.score(&entry(50 * MB, 0, CachePriority::Normal), now);
            let low = policy.score(&entry(MB, 0, CachePriority::Low), now);
            let high = policy.score(&entry(MB, 0, CachePriority::High), now);

            assert!(old > fresh);
            assert!(big > fresh);
            assert!(low > fresh && fresh > high);
            assert!((fresh - (0.3 + 2.0 * 0.3)).abs() < 1e-9);
        }

        #[test]
        fn test_needs_cleanup_threshold() {
            let policy = EvictionPolicy::new(100, Duration::days(7), 80);
            assert!(!policy.needs_cleanup(79));
            assert!(policy.needs_cleanup(80));
        }
    }

    mod pin_tests {
        use super::*;

        #[test]
        fn test_pin_before_admit_admits_pinned() {
            let cache = manager(100);
            assert!(!cache.pin(&path("/later.bin")));
            admit(&cache, "/later.bin", MB, CachePriority::Normal, Utc::now());

            assert_eq!(cache.get(&path("/later.bin")).unwrap().priority(), CachePriority::Pinned);
            assert!(cache.is_available_offline(&path("/later.bin")));
        }

        #[test]
        fn test_unpin_restores_normal_priority() {
            let cache = manager(100);
            admit(&cache, "/a.bin", MB, CachePriority::Normal, Utc::now());
            assert!(cache.pin(&path("/a.bin")));
            assert!(cache.unpin(&path("/a.bin")));

            assert_eq!(cache.get(&path("/a.bin")).unwrap().priority(), CachePriority::Normal);
            assert!(!cache.unpin(&path("/a.bin")));
        }

        #[test]
        fn test_touch_updates_last_access() {
            let cache = manager(100);
            let then = Utc::now() - Duration::days(3);
            admit(&cache, "/a.bin", MB, CachePriority::Normal, then);

            assert!(cache.touch(&path("/a.bin"), Utc::now()));
            assert!(cache.get(&path("/a.bin")).unwrap().last_accessed() > then);
            assert!(!cache.touch(&path("/missing"), Utc::now()));
        }

        #[test]
        fn test_readmit_updates_existing_entry() {
            let cache = manager(100);
            admit(&cache, "/a.bin", MB, CachePriority::High, Utc::now());
            let update = cache.admit(
                UniqueId::new(),
                path("/a.bin"),
                PathBuf::from("/a.bin"),
                3 * MB,
                CachePriority::Low,
                Utc::now(),
            );

            assert_eq!(update, CacheUpdate::Updated);
            let entry = cache.get(&path("/a.bin")).unwrap();
            assert_eq!(entry.size(), 3 * MB);
            assert_eq!(entry.priority(), CachePriority::High);
        }
    }

    mod budget_tests {
        use super::*;

        #[test]
        fn test_enforce_budget_spares_pinned_entry() {
            let cache = manager(100);
            let now = Utc::now();
            admit(&cache, "/pinned.iso", 80 * MB, CachePriority::Normal, now);
            cache.pin(&path("/pinned.iso"));
            admit(&cache, "/a.bin", 30 * MB, CachePriority::Normal, now);
            admit(&cache, "/b.bin", 25 * MB, CachePriority::Normal, now);
            admit(&cache, "/c.bin", 15 * MB, CachePriority::Normal, now);

            let evicted = cache.enforce_budget(100 * MB, now).unwrap();

            assert!(evicted.iter().all(|e| !e.is_pinned()));
            assert!(cache.is_available_offline(&path("/pinned.iso")));
            assert!(cache.used_bytes() <= 100 * MB);
            // Largest first at equal age and priority
            assert_eq!(evicted[0].path(), &path("/a.bin"));
        }

        #[test]
        fn test_enforce_budget_reports_unreachable_budget() {
            let cache = manager(100);
            let now = Utc::now();
            admit(&cache, "/pinned.iso", 80 * MB, CachePriority::Pinned, now);
            admit(&cache, "/a.bin", 40 * MB, CachePriority::Normal, now);
            admit(&cache, "/b.bin", 30 * MB, CachePriority::Low, now);

            match cache.enforce_budget(50 * MB, now) {
                Err(CacheError::BudgetUnreachable {
                    used_bytes,
                    budget_bytes,
                    evicted,
                }) => {
                    assert_eq!(used_bytes, 80 * MB);
                    assert_eq!(budget_bytes, 50 * MB);
                    assert_eq!(evicted.len(), 2);
                    assert!(evicted.iter().all(|e| !e.is_pinned()));
                }
                other => panic!("expected BudgetUnreachable, got {other:?}"),
            }
            assert!(cache.is_available_offline(&path("/pinned.iso")));
            assert!(cache.last_cleanup().is_some());
        }

        #[test]
        fn test_under_budget_evicts_nothing() {
            let cache = manager(100);
            admit(&cache, "/a.bin", MB, CachePriority::Normal, Utc::now());
            assert!(cache.enforce_budget(100 * MB, Utc::now()).unwrap().is_empty());
        }

        #[test]
        fn test_cleanup_stale_keeps_recent_and_pinned() {
            let cache = manager(100);
            let now = Utc::now();
            admit(&cache, "/old.bin", MB, CachePriority::Normal, now - Duration::days(10));
            admit(&cache, "/old-pinned.bin", MB, CachePriority::Pinned, now - Duration::days(10));
            admit(&cache, "/new.bin", MB, CachePriority::Normal, now);

            let evicted = cache.cleanup_stale(now);
            assert_eq!(evicted.len(), 1);
            assert_eq!(evicted[0].path(), &path("/old.bin"));
            assert_eq!(cache.usage().item_count, 2);
        }

        #[test]
        fn test_invalidate_drops_subtree_including_pins() {
            let cache = manager(100);
            let now = Utc::now();
            admit(&cache, "/Docs/a.txt", MB, CachePriority::Normal, now);
            admit(&cache, "/Docs/sub/b.txt", MB, CachePriority::Normal, now);
            admit(&cache, "/Docsx/c.txt", MB, CachePriority::Normal, now);
            cache.pin(&path("/Docs/a.txt"));

            let removed = cache.invalidate(&path("/Docs"));
            assert_eq!(removed.len(), 2);
            assert!(!cache.is_pinned(&path("/Docs/a.txt")));
            assert!(cache.is_available_offline(&path("/Docsx/c.txt")));
        }

        #[test]
        fn test_usage_counts_pinned_bytes() {
            let cache = manager(1);
            admit(&cache, "/a.bin", 600 * 1024, CachePriority::Pinned, Utc::now());
            admit(&cache, "/b.bin", 300 * 1024, CachePriority::Normal, Utc::now());

            let usage = cache.usage();
            assert_eq!(usage.used_bytes, 900 * 1024);
            assert_eq!(usage.pinned_bytes, 600 * 1024);
            assert_eq!(usage.item_count, 2);
            assert!(cache.needs_cleanup());
        }

        #[test]
        fn test_relocate_moves_entries_and_pins() {
            let cache = manager(100);
            admit(&cache, "/Old/a.txt", MB, CachePriority::Normal, Utc::now());
            cache.pin(&path("/Old/a.txt"));

            cache.relocate(&path("/Old"), &path("/New"), |p| PathBuf::from(p.as_str()));
            assert!(cache.is_available_offline(&path("/New/a.txt")));
            assert!(cache.is_pinned(&path("/New/a.txt")));
            assert!(!cache.is_available_offline(&path("/Old/a.txt")));
        }
    }
}
