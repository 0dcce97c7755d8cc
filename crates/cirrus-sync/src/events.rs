//! Observer notifications
//!
//! The engine publishes [`SyncEvent`]s on a `tokio::sync::broadcast`
//! channel. Publishing never waits: with no subscriber the event is
//! dropped, and a subscriber that falls behind sees `Lagged` and skips
//! ahead instead of slowing the engine down.

use tokio::sync::broadcast;
use tracing::trace;

use cirrus_core::domain::SyncEvent;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out of engine events to any number of observers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send `event` to every current subscriber
    pub fn publish(&self, event: SyncEvent) {
        trace!(event = ?event, "Publishing sync event");
        // An error only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
