//! Error types for the conflict engine

use thiserror::Error;

use cirrus_core::domain::DomainError;

/// Errors that can occur during conflict detection and resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A step of a resolution plan failed (upload, download, rename, ...)
    #[error("resolution step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// Conflict already resolved
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// Invalid glob pattern in conflict rule
    #[error("invalid glob pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Unknown strategy name in configuration
    #[error("invalid strategy '{0}'")]
    InvalidStrategy(String),

    /// The item or record rejected the change
    #[error(transparent)]
    Domain(#[from] DomainError),
}
