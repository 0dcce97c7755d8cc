//! Per-path mutual exclusion
//!
//! Every state transition of an item happens while holding the lock for its
//! logical path. Unrelated paths never contend, so transfers of different
//! items progress in parallel while two workers can never transition the
//! same item at once.
//!
//! ## Design Notes
//!
//! - Locks are keyed by [`RemotePath`] rather than item id: a creation event
//!   has no item yet, and a move must exclude both its source and its
//!   destination.
//! - Guards are owned (`OwnedMutexGuard`) so they can be held across
//!   `.await` points inside spawned tasks.
//! - [`ItemLocks::lock_many`] acquires in sorted order, which rules out
//!   lock-order deadlocks between two concurrent moves.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cirrus_core::domain::RemotePath;

/// Table of per-path async mutexes
#[derive(Default)]
pub struct ItemLocks {
    locks: DashMap<RemotePath, Arc<Mutex<()>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, path: &RemotePath) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &RemotePath) -> OwnedMutexGuard<()> {
        self.handle(path).lock_owned().await
    }

    /// Lock several paths at once, in a global order
    pub async fn lock_many(&self, paths: &[&RemotePath]) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered: Vec<&RemotePath> = paths.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for path in ordered {
            guards.push(self.lock(path).await);
        }
        guards
    }

    /// Drop table entries nobody holds or waits for
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn path(p: &str) -> RemotePath {
        RemotePath::new(p.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_same_path_is_serialized() {
        let locks = Arc::new(ItemLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&path("/a.txt")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_paths_do_not_contend() {
        let locks = ItemLocks::new();
        let _a = locks.lock(&path("/a.txt")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&path("/b.txt"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_many_dedups_and_prune_releases() {
        let locks = ItemLocks::new();
        {
            let guards = locks
                .lock_many(&[&path("/b"), &path("/a"), &path("/b")])
                .await;
            assert_eq!(guards.len(), 2);
            locks.prune();
            assert_eq!(locks.len(), 2);
        }
        locks.prune();
        assert!(locks.is_empty());
    }
}
