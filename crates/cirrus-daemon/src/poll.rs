//! Polling change feeds
//!
//! The daemon has no filesystem watcher; [`LocalPoller`] walks the sync root
//! on an interval and [`RemotePoller`] asks the transport for changes since
//! the stored cursor. Both push [`ChangeEvent`]s into the scheduler's
//! channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cirrus_core::domain::ChangeEvent;
use cirrus_core::ports::{IItemStore, ITransport};

use crate::snapshot::{self, Snapshot};

/// Walks the sync root and reports what changed since the previous walk
pub struct LocalPoller {
    root: PathBuf,
    previous: Snapshot,
    tx: mpsc::Sender<ChangeEvent>,
}

impl LocalPoller {
    /// The first poll reports every existing entry as created
    pub fn new(root: PathBuf, tx: mpsc::Sender<ChangeEvent>) -> Self {
        Self {
            root,
            previous: Snapshot::new(),
            tx,
        }
    }

    /// Walk once and send the differences; returns how many were sent
    pub async fn poll_once(&mut self) -> anyhow::Result<usize> {
        let current = snapshot::walk(&self.root)
            .await
            .with_context(|| format!("Failed to scan {}", self.root.display()))?;
        let changes = snapshot::diff(&self.previous, &current);
        self.previous = current;

        let count = changes.len();
        for (kind, path) in changes {
            self.tx
                .send(ChangeEvent::local(kind, path))
                .await
                .context("Change channel closed")?;
        }
        if count > 0 {
            debug!(count, "Local changes found");
        }
        Ok(count)
    }

    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Local poll failed");
                    }
                }
            }
        }
        info!("Local poller stopped");
    }
}

/// Pages through remote changes, persisting the cursor after each page
pub struct RemotePoller {
    transport: Arc<dyn ITransport>,
    store: Arc<dyn IItemStore>,
    tx: mpsc::Sender<ChangeEvent>,
}

impl RemotePoller {
    pub fn new(transport: Arc<dyn ITransport>, store: Arc<dyn IItemStore>, tx: mpsc::Sender<ChangeEvent>) -> Self {
        Self { transport, store, tx }
    }

    /// Fetch every available page; returns how many changes were sent
    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let mut cursor = self.store.get_cursor().await?;
        let mut count = 0;
        loop {
            let page = self.transport.get_changes(cursor.as_ref()).await?;
            count += page.changes.len();
            for change in page.changes {
                self.tx.send(change).await.context("Change channel closed")?;
            }
            self.store.save_cursor(&page.cursor).await?;
            cursor = Some(page.cursor);
            if !page.has_more {
                break;
            }
        }
        if count > 0 {
            debug!(count, "Remote changes found");
        }
        Ok(count)
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Remote poll failed");
                    }
                }
            }
        }
        info!("Remote poller stopped");
    }
}
