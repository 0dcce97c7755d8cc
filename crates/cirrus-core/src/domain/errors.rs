//! Domain error types
//!
//! Raised by the validated newtypes and by the item state machine. These
//! errors never carry I/O causes; adapters report those through
//! `anyhow::Error` and [`SyncFailure`](super::failure::SyncFailure).

use thiserror::Error;

/// Rejections raised while building or mutating domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Fingerprints must be non-empty ASCII alphanumeric
    #[error("Invalid fingerprint: {0}")]
    InvalidHash(String),

    /// `can_transition_to` refused the move
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },

    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A local path that does not live below the sync root
    #[error("Path outside the sync root: {0}")]
    PathNotInSyncRoot(String),

    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    #[error("Invalid remote identifier: {0}")]
    InvalidRemoteId(String),

    #[error("Invalid change cursor: {0}")]
    InvalidCursor(String),

    /// Not a UUID
    #[error("Invalid item identifier: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_names_both_states() {
        let err = DomainError::InvalidState {
            from: "synced".to_string(),
            to: "local_only".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from synced to local_only"
        );
    }

    #[test]
    fn test_messages_carry_the_offending_value() {
        assert_eq!(
            DomainError::InvalidHash("ab-cd".to_string()).to_string(),
            "Invalid fingerprint: ab-cd"
        );
        assert_eq!(
            DomainError::PathNotInSyncRoot("/etc/passwd".to_string()).to_string(),
            "Path outside the sync root: /etc/passwd"
        );
    }

    #[test]
    fn test_errors_compare_by_payload() {
        let invariant = DomainError::InvariantViolated("conflict without record".to_string());
        assert_eq!(invariant.clone(), invariant);
        assert_ne!(
            invariant,
            DomainError::InvariantViolated("synced without last sync".to_string())
        );
    }
}
