//! Errors returned by the engine's command surface

use thiserror::Error;

use cirrus_cache::CacheError;
use cirrus_conflict::ConflictError;
use cirrus_core::domain::{DomainError, RemotePath, ResolutionOption};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// No item is tracked at the path
    #[error("no item at {0}")]
    UnknownPath(RemotePath),

    /// The item at the path has no pending conflict
    #[error("no pending conflict at {0}")]
    NoConflict(RemotePath),

    /// The pending conflict does not offer the requested option
    #[error("{option} is not offered for the conflict at {path}")]
    OptionNotOffered {
        option: ResolutionOption,
        path: RemotePath,
    },

    /// Nothing is queued or in flight for the path
    #[error("no transfer to cancel at {0}")]
    NotCancellable(RemotePath),

    /// The command is not allowed in the current engine state
    #[error("cannot {command} while the engine is {state}")]
    InvalidEngineState {
        command: &'static str,
        state: String,
    },

    /// A domain-level error propagated from cirrus-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A port adapter failed
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
