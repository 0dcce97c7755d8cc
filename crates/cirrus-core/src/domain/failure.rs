//! Failure taxonomy for transfers and metadata operations
//!
//! Adapters attach a [`SyncFailure`] to the errors they return whenever they
//! can name the cause, so the retry scheduler can classify them without
//! guessing from error text.
//!
//! ```text
//!   transient (retried with backoff)      permanent (surfaced immediately)
//!   ───────────────────────────────       ────────────────────────────────
//!   NetworkUnavailable                    AuthenticationFailed
//!   Timeout                               PermissionDenied
//!   ServerError(5xx)                      InsufficientSpace
//!   RateLimited                           QuotaExceeded
//!   FileInUse                             MetadataCorrupted
//!                                         ChecksumMismatch
//!                                         NotFound, ServerError(4xx)
//!                                         Unclassified
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The same operation may succeed later
    Transient,
    /// Retrying cannot help without outside intervention
    Permanent,
}

impl FailureClass {
    /// Returns true for [`FailureClass::Transient`]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// A classified failure of a sync operation
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SyncFailure {
    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("operation timed out")]
    Timeout,

    #[error("server error (HTTP {0})")]
    ServerError(u16),

    #[error("rate limited by the remote store")]
    RateLimited,

    #[error("file in use: {0}")]
    FileInUse(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient local disk space")]
    InsufficientSpace,

    #[error("remote quota exceeded")]
    QuotaExceeded,

    #[error("local metadata is corrupted")]
    MetadataCorrupted,

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    /// An adapter error nothing more specific could be read from
    #[error("{0}")]
    Unclassified(String),
}

impl SyncFailure {
    /// Classify this failure
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            SyncFailure::NetworkUnavailable
            | SyncFailure::Timeout
            | SyncFailure::RateLimited
            | SyncFailure::FileInUse(_) => FailureClass::Transient,
            SyncFailure::ServerError(status) if (500..600).contains(status) => {
                FailureClass::Transient
            }
            _ => FailureClass::Permanent,
        }
    }

    /// Short stable name used for statistics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncFailure::NetworkUnavailable => "network_unavailable",
            SyncFailure::Timeout => "timeout",
            SyncFailure::ServerError(_) => "server_error",
            SyncFailure::RateLimited => "rate_limited",
            SyncFailure::FileInUse(_) => "file_in_use",
            SyncFailure::AuthenticationFailed => "authentication_failed",
            SyncFailure::PermissionDenied(_) => "permission_denied",
            SyncFailure::InsufficientSpace => "insufficient_space",
            SyncFailure::QuotaExceeded => "quota_exceeded",
            SyncFailure::MetadataCorrupted => "metadata_corrupted",
            SyncFailure::ChecksumMismatch(_) => "checksum_mismatch",
            SyncFailure::NotFound(_) => "not_found",
            SyncFailure::Cancelled => "cancelled",
            SyncFailure::Unclassified(_) => "unclassified",
        }
    }
}
