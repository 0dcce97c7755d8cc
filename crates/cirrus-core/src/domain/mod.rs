//! Domain entities and business logic
//!
//! This module contains the core domain types for Cirrus:
//! - Newtypes for type-safe identifiers, paths and fingerprints
//! - Sync items and their state machine
//! - Conflict records and resolution options
//! - Folder nodes of the selective-sync tree
//! - Offline cache entries
//! - Retryable operations and the failure taxonomy
//! - Change feed input and observer events
//! - Domain-specific error types

pub mod conflict;
pub mod errors;
pub mod events;
pub mod failure;
pub mod folder;
pub mod newtypes;
pub mod offline;
pub mod operation;
pub mod remote;
pub mod sync_item;

// Re-export commonly used types
pub use conflict::{ConflictRecord, ConflictType, ResolutionOption, ResolutionSource, VersionInfo};
pub use errors::DomainError;
pub use events::{
    CacheUpdate, ChangeEvent, ChangeKind, ChangeOrigin, EngineState, ItemChangeKind, SyncEvent,
    SyncProgress,
};
pub use failure::{FailureClass, SyncFailure};
pub use folder::{FolderNode, NodeId};
pub use newtypes::*;
pub use offline::{CachePriority, CacheUsage, OfflineCacheEntry};
pub use operation::{OperationKind, RetryableOperation};
pub use remote::RemoteDescriptor;
pub use sync_item::{ErrorInfo, ItemKind, SyncItem, SyncState, Tombstone};
