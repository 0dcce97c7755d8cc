//! Cirrus Sync - Sync orchestrator
//!
//! Provides:
//! - The per-item state machine driven by local and remote change events
//! - Error classification and retry scheduling with exponential backoff
//! - A shared bandwidth allocator for concurrent transfers
//! - The selective-sync folder tree
//! - A debounced scheduler consuming the change feed
//!
//! ## Modules
//!
//! - [`engine`] - [`SyncEngine`], the orchestrator behind the command and query surface
//! - [`scheduler`] - Single sequencer feeding settled events into the engine
//! - [`feed`] - Per-path debouncing of change events
//! - [`retry`] - Error classifier, backoff policy and retry queue
//! - [`bandwidth`] - Weighted rate allocation per transfer
//! - [`selective`] - Arena-backed folder tree with selection propagation
//! - [`locks`] - Per-path mutual exclusion
//! - [`events`] - Broadcast bus for observer notifications
//! - [`offline_queue`] - Local changes recorded while the network is down
//! - [`filesystem`] - `ILocalFileSystem` adapter over `tokio::fs`

pub mod bandwidth;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod filesystem;
pub mod locks;
pub mod offline_queue;
pub mod retry;
pub mod scheduler;
pub mod selective;

pub use bandwidth::{BandwidthAllocator, Direction, TransferPriority};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use events::EventBus;
pub use feed::DebouncedChangeQueue;
pub use filesystem::LocalFileSystemAdapter;
pub use locks::ItemLocks;
pub use offline_queue::OfflineQueue;
pub use retry::{ErrorClassifier, ErrorStatistics, RetryDecision, RetryPolicy, RetryQueue};
pub use scheduler::SyncScheduler;
pub use selective::{FolderTree, SelectionChange};
