//! Local changes recorded while the network is unavailable
//!
//! Nothing can be uploaded without a connection, so local events are parked
//! here in observation order and replayed through the engine when the
//! network comes back. Remote events are not queued: the change cursor
//! redelivers them.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use cirrus_core::domain::ChangeEvent;

/// Timestamp-ordered queue of pending local events
#[derive(Debug, Default)]
pub struct OfflineQueue {
    events: Mutex<VecDeque<ChangeEvent>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event`, keeping the queue ordered by `observed_at`
    pub fn push(&self, event: ChangeEvent) {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let position = events
            .iter()
            .rposition(|e| e.observed_at <= event.observed_at)
            .map_or(0, |i| i + 1);
        debug!(path = %event.path, queued = events.len() + 1, "Queued change while offline");
        events.insert(position, event);
    }

    /// Take every queued event, oldest first
    pub fn drain(&self) -> Vec<ChangeEvent> {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
