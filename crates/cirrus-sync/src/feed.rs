//! Per-path debouncing of the change feed
//!
//! Editors and remote change listings both produce bursts of events for the
//! same path. [`DebouncedChangeQueue`] keeps one pending event per
//! (origin, path) and only releases it once the path has been quiet for the
//! debounce delay.
//!
//! ## Coalescing rules
//!
//! | pending   | incoming  | result                        |
//! |-----------|-----------|-------------------------------|
//! | Created   | Modified  | Created, with the new details |
//! | Created   | Deleted   | nothing (the path never settled) |
//! | any       | any other | the incoming event            |
//!
//! Local and remote events are kept apart so a remote notification can
//! never hide a local edit of the same path.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use cirrus_core::domain::{ChangeEvent, ChangeKind, ChangeOrigin, RemotePath};

/// Collects change events and releases them once they settle
#[derive(Debug)]
pub struct DebouncedChangeQueue {
    /// Latest event per key and the time it was last touched
    pending: HashMap<(ChangeOrigin, RemotePath), (ChangeEvent, Instant)>,
    debounce_delay: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
        }
    }

    #[must_use]
    pub fn debounce_delay(&self) -> Duration {
        self.debounce_delay
    }

    /// Insert or coalesce `event`, restarting its quiet period
    pub fn push(&mut self, event: ChangeEvent) {
        let key = (event.origin, event.path.clone());
        debug!(path = %event.path, origin = %event.origin, kind = ?event.kind, "Enqueuing change event");

        let pending_creation = self
            .pending
            .remove(&key)
            .is_some_and(|(previous, _)| previous.kind == ChangeKind::Created);

        let merged = if !pending_creation {
            Some(event)
        } else if event.kind == ChangeKind::Modified {
            Some(ChangeEvent {
                kind: ChangeKind::Created,
                ..event
            })
        } else if event.kind == ChangeKind::Deleted {
            None
        } else {
            Some(event)
        };

        if let Some(event) = merged {
            self.pending.insert(key, (event, Instant::now()));
        }
    }

    /// Remove and return every event quiet for at least the debounce delay
    ///
    /// Events come back in observation order.
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let settled_keys: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, (_, touched))| now.duration_since(*touched) >= self.debounce_delay)
            .map(|(key, _)| key.clone())
            .collect();

        let mut settled: Vec<ChangeEvent> = settled_keys
            .iter()
            .filter_map(|key| self.pending.remove(key).map(|(event, _)| event))
            .collect();
        settled.sort_by_key(|e| e.observed_at);

        if !settled.is_empty() {
            debug!(count = settled.len(), "Polled settled change events");
        }
        settled
    }

    /// Remove and return everything, settled or not
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut all: Vec<ChangeEvent> = self.pending.drain().map(|(_, (e, _))| e).collect();
        all.sort_by_key(|e| e.observed_at);
        all
    }

    /// Number of pending (unsettled) events
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
