//! Cirrus Daemon - Background synchronization service
//!
//! Runs the sync engine against a directory-backed remote:
//! - Polls the sync root and the remote directory for changes
//! - Feeds them through the debounced scheduler into the engine
//! - Logs every engine event (or prints them as JSON lines)
//! - Persists item state and the cache index on graceful shutdown
//!
//! # Architecture
//!
//! Two pollers and the scheduler share one `mpsc` channel. Everything is
//! tied to a `CancellationToken` that is triggered on SIGTERM or SIGINT;
//! with `--once` the daemon scans both sides a single time, waits for the
//! engine to go idle and exits.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cirrus_cache::{InMemoryItemStore, OfflineCacheManager};
use cirrus_core::config::{Config, LoggingConfig};
use cirrus_core::domain::SyncEvent;
use cirrus_sync::{LocalFileSystemAdapter, SyncEngine, SyncScheduler};

mod poll;
mod snapshot;
mod transport;

use poll::{LocalPoller, RemotePoller};
use transport::DirectoryTransport;

/// Capacity of the change channel between the pollers and the scheduler
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "cirrusd", version, about = "Cirrus synchronization daemon")]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory acting as the remote store
    #[arg(long)]
    remote_dir: Option<PathBuf>,

    /// Synchronize once and exit
    #[arg(long)]
    once: bool,

    /// Print engine events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cirrus")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration:\n  {}", listed.join("\n  "));
    }
    Ok(config)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the engine, its adapters and the persisted state locations
struct DaemonService {
    config: Config,
    engine: Arc<SyncEngine>,
    transport: Arc<DirectoryTransport>,
    store: Arc<InMemoryItemStore>,
    cache: Arc<OfflineCacheManager>,
    /// Snapshot of the item store, rewritten on shutdown
    state_path: PathBuf,
    json_events: bool,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Restores persisted state and builds the engine
    async fn new(args: &Args, config: Config, shutdown: CancellationToken) -> Result<Self> {
        let root = config.sync.resolved_root();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create sync root {}", root.display()))?;

        let remote_dir = args
            .remote_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("remote"));
        let transport = Arc::new(DirectoryTransport::open(remote_dir).await?);

        let state_path = data_dir().join("state.json");
        let store = Arc::new(
            InMemoryItemStore::load_or_new(&state_path)
                .await
                .context("Failed to restore item state")?,
        );

        let cache = Arc::new(OfflineCacheManager::from_config(&config.offline));
        match cache.load_index().await {
            Ok(entries) => info!(entries, "Cache index restored"),
            Err(e) => warn!(error = %e, "Cache index unreadable, starting with an empty cache"),
        }

        let engine = SyncEngine::new(
            transport.clone(),
            store.clone(),
            Arc::new(LocalFileSystemAdapter::new()),
            &config,
        )
        .context("Failed to create sync engine")?
        .with_cache(Arc::clone(&cache));

        Ok(Self {
            config,
            engine: Arc::new(engine),
            transport,
            store,
            cache,
            state_path,
            json_events: args.json_events,
            shutdown,
        })
    }

    /// Runs until shutdown, or through a single pass with `once`
    async fn run(&self, once: bool) -> Result<()> {
        self.engine.start().await.context("Failed to start sync engine")?;
        let events = tokio::spawn(log_events(
            self.engine.subscribe(),
            self.json_events,
            self.shutdown.clone(),
        ));

        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let mut local = LocalPoller::new(self.config.sync.resolved_root(), tx.clone());
        let remote = RemotePoller::new(self.transport.clone(), self.store.clone(), tx);
        let (mut scheduler, _sync_requested) = SyncScheduler::from_config(
            Arc::clone(&self.engine),
            rx,
            &self.config.sync,
            self.shutdown.clone(),
        );

        if once {
            remote.poll_once().await.context("Remote scan failed")?;
            local.poll_once().await.context("Local scan failed")?;
            // Both senders are gone, so the scheduler applies everything and returns
            drop(local);
            drop(remote);
            scheduler.run().await;
            self.engine.run_until_idle().await?;
            info!(
                conflicts = self.engine.pending_conflicts().await?.len(),
                "Single pass complete"
            );
        } else {
            let poll_interval = self.config.sync.poll_interval_duration();
            tokio::spawn(remote.run(poll_interval, self.shutdown.clone()));
            tokio::spawn(local.run(poll_interval, self.shutdown.clone()));
            scheduler.run().await;
        }

        self.shutdown.cancel();
        if let Err(e) = events.await {
            warn!(error = %e, "Event logger ended abnormally");
        }
        Ok(())
    }

    /// Stops transfers and writes the item store and the cache index
    async fn persist(&self) -> Result<()> {
        self.engine.stop().await.context("Failed to stop sync engine")?;
        self.store
            .save_to(&self.state_path)
            .await
            .context("Failed to save item state")?;
        self.cache.save_index().await.context("Failed to save cache index")?;
        info!(path = %self.state_path.display(), "State saved");
        Ok(())
    }
}

/// Logs engine events until shutdown
async fn log_events(mut rx: broadcast::Receiver<SyncEvent>, json: bool, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = rx.recv() => received,
        };
        match event {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            },
            Ok(SyncEvent::OperationFailed {
                operation,
                path,
                failure,
                terminal,
            }) => warn!(operation = %operation, path = %path, failure = %failure, terminal, "Operation failed"),
            Ok(SyncEvent::ConflictDetected(record)) => {
                warn!(path = %record.path(), conflict = %record.conflict_type(), "Conflict detected");
            }
            Ok(event) => info!(event = ?event, "Sync event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    init_tracing(&config.logging);

    info!(root = %config.sync.resolved_root().display(), "Cirrus daemon starting (cirrusd)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(&args, config, shutdown_token.clone()).await?;
    let result = service.run(args.once).await;
    let saved = service.persist().await;

    match (&result, &saved) {
        (Ok(()), Ok(())) => info!("Cirrus daemon shut down gracefully"),
        (Err(e), _) | (_, Err(e)) => error!(error = %e, "Cirrus daemon exiting with error"),
    }

    result.and(saved)
}
