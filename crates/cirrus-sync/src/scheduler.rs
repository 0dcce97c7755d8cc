//! Sync scheduler - the single sequencer between the change feed and the engine
//!
//! The [`SyncScheduler`] receives raw change events from the local watcher
//! and the remote poller, feeds them through a [`DebouncedChangeQueue`],
//! and hands settled events to [`SyncEngine::observe`] one at a time. After
//! each batch, on every poll interval and whenever the engine reports
//! finished work, it runs [`SyncEngine::tick`] to start queued transfers.
//!
//! ## Flow
//!
//! ```text
//! watcher ─┐
//!          ├─→ mpsc::Receiver ──→ SyncScheduler ──→ SyncEngine::observe
//! poller  ─┘                          │                    │
//!                              DebouncedChangeQueue   SyncEngine::tick
//! ```
//!
//! The scheduler also supports user-initiated sync requests that bypass
//! the debounce window entirely, useful for "sync now" commands.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cirrus_core::config::SyncConfig;
use cirrus_core::domain::ChangeEvent;

use crate::engine::SyncEngine;
use crate::feed::DebouncedChangeQueue;

/// Bounds of the interval at which the debounce queue is polled
const MIN_SETTLE_CHECK: Duration = Duration::from_millis(10);
const MAX_SETTLE_CHECK: Duration = Duration::from_secs(1);

/// How often to look for settled events, given the debounce delay
fn settle_check_interval(debounce_delay: Duration) -> Duration {
    (debounce_delay / 4).clamp(MIN_SETTLE_CHECK, MAX_SETTLE_CHECK)
}

/// Feeds debounced change events into a [`SyncEngine`]
///
/// ## User-Initiated Sync
///
/// Calling [`request_sync()`](SyncScheduler::request_sync) or setting the
/// returned flag makes the next check release every pending event at once,
/// settled or not.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    /// Receiver for change events from the watcher and the remote poller
    change_rx: mpsc::Receiver<ChangeEvent>,
    queue: DebouncedChangeQueue,
    /// Shared flag asking for an immediate flush of the queue
    sync_requested: Arc<AtomicBool>,
    /// Interval of the periodic tick, independent of incoming events
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// Creates a new `SyncScheduler`
    ///
    /// # Arguments
    /// * `engine` - Engine that applies the settled events
    /// * `change_rx` - Channel receiver for change events
    /// * `debounce_delay` - How long a path must be quiet before its event is applied
    /// * `poll_interval` - How often to tick the engine without new events
    /// * `shutdown` - Cancelling it ends [`run`](SyncScheduler::run)
    ///
    /// # Returns
    /// A tuple of `(SyncScheduler, Arc<AtomicBool>)`. Setting the `AtomicBool`
    /// to `true` flushes the debounce queue on the next check.
    pub fn new(
        engine: Arc<SyncEngine>,
        change_rx: mpsc::Receiver<ChangeEvent>,
        debounce_delay: Duration,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> (Self, Arc<AtomicBool>) {
        let sync_requested = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&sync_requested);

        info!(
            debounce_ms = debounce_delay.as_millis() as u64,
            poll_ms = poll_interval.as_millis() as u64,
            "Creating sync scheduler"
        );

        let scheduler = Self {
            engine,
            change_rx,
            queue: DebouncedChangeQueue::new(debounce_delay),
            sync_requested,
            poll_interval,
            shutdown,
        };
        (scheduler, flag)
    }

    /// Scheduler using the debounce delay and poll interval of `config`
    pub fn from_config(
        engine: Arc<SyncEngine>,
        change_rx: mpsc::Receiver<ChangeEvent>,
        config: &SyncConfig,
        shutdown: CancellationToken,
    ) -> (Self, Arc<AtomicBool>) {
        Self::new(
            engine,
            change_rx,
            config.debounce_duration(),
            config.poll_interval_duration(),
            shutdown,
        )
    }

    /// Adds a change event to the debounced queue
    pub fn enqueue(&mut self, event: ChangeEvent) {
        self.queue.push(event);
    }

    /// Requests an immediate sync, bypassing the debounce queue
    pub fn request_sync(&self) {
        info!("User-initiated sync requested (bypassing debounce)");
        self.sync_requested.store(true, Ordering::Release);
    }

    /// Returns whether a sync has been requested and not yet served
    pub fn is_sync_requested(&self) -> bool {
        self.sync_requested.load(Ordering::Acquire)
    }

    /// Number of events still waiting to settle
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Apply events in order; failures are logged and do not stop the batch
    async fn apply(&self, events: Vec<ChangeEvent>) -> usize {
        let mut applied = 0;
        for event in events {
            let path = event.path.clone();
            match self.engine.observe(event).await {
                Ok(()) => applied += 1,
                Err(e) => error!(path = %path, error = %e, "Failed to apply change"),
            }
        }
        applied
    }

    async fn tick(&self) {
        if let Err(e) = self.engine.tick().await {
            error!(error = %e, "Sync tick failed");
        }
    }

    /// Release settled events (or everything, if a sync was requested)
    /// and apply them; returns the number applied
    pub async fn flush(&mut self) -> usize {
        let settled = if self.sync_requested.swap(false, Ordering::AcqRel) {
            self.queue.drain()
        } else {
            self.queue.poll()
        };
        if settled.is_empty() {
            return 0;
        }

        info!(count = settled.len(), "Applying settled changes");
        let applied = self.apply(settled).await;
        self.tick().await;
        applied
    }

    /// Main event loop
    ///
    /// Runs until the shutdown token is cancelled or the change channel is
    /// closed. On channel close, pending events are applied before returning.
    pub async fn run(&mut self) {
        info!("Sync scheduler starting");

        let mut settle_timer = tokio::time::interval(settle_check_interval(self.queue.debounce_delay()));
        settle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_timer = tokio::time::interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(pending = self.queue.pending_count(), "Shutdown requested, scheduler stopping");
                    break;
                }

                event = self.change_rx.recv() => {
                    match event {
                        Some(change) => {
                            debug!(path = %change.path, origin = %change.origin, "Scheduler received change event");
                            self.queue.push(change);
                        }
                        None => {
                            let remaining = self.queue.drain();
                            info!(count = remaining.len(), "Change channel closed, applying remaining events");
                            self.apply(remaining).await;
                            self.tick().await;
                            break;
                        }
                    }
                }

                _ = settle_timer.tick() => {
                    self.flush().await;
                }

                _ = poll_timer.tick() => {
                    self.tick().await;
                }

                _ = self.engine.notified() => {
                    self.tick().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}
