//! Retryable operations
//!
//! A [`RetryableOperation`] is a queued transfer or metadata change that
//! failed at least once. The attempt counter is capped at the maximum: the
//! failure that reaches the cap makes the operation terminal, and terminal
//! operations are reported instead of being retried again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::{FailureClass, SyncFailure};
use super::newtypes::{OperationId, RemotePath};

/// Kind of work an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Send local content to the remote store
    Upload,
    /// Fetch remote content into the local tree
    Download,
    /// Remove the remote object
    DeleteRemote,
    /// Remove the local file or folder
    DeleteLocal,
    /// Move or rename the remote object
    MoveRemote,
    /// Move or rename the local file or folder
    MoveLocal,
    /// Apply a conflict resolution plan
    Resolve,
}

impl OperationKind {
    /// Stable lowercase name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::DeleteRemote => "delete_remote",
            OperationKind::DeleteLocal => "delete_local",
            OperationKind::MoveRemote => "move_remote",
            OperationKind::MoveLocal => "move_local",
            OperationKind::Resolve => "resolve",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed operation waiting for another attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryableOperation {
    id: OperationId,
    kind: OperationKind,
    path: RemotePath,
    attempt_count: u32,
    max_attempts: u32,
    last_failure: Option<SyncFailure>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl RetryableOperation {
    /// Create an operation that has not failed yet
    ///
    /// `max_attempts` is raised to 1 if zero is given.
    #[must_use]
    pub fn new(kind: OperationKind, path: RemotePath, max_attempts: u32) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            path,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_failure: None,
            next_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<&SyncFailure> {
        self.last_failure.as_ref()
    }

    /// Classification of the most recent failure
    #[must_use]
    pub fn last_failure_class(&self) -> Option<FailureClass> {
        self.last_failure.as_ref().map(SyncFailure::class)
    }

    #[must_use]
    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record one more failed attempt
    ///
    /// Returns true when the operation became terminal: either the attempt
    /// cap was reached or the failure is permanent.
    pub fn record_failure(&mut self, failure: SyncFailure) -> bool {
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        self.last_failure = Some(failure);
        self.next_attempt_at = None;
        self.is_terminal()
    }

    /// True once no further automatic attempt is allowed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.attempt_count >= self.max_attempts
            || self.last_failure_class() == Some(FailureClass::Permanent)
    }

    /// Set the time of the next attempt
    pub fn schedule_at(&mut self, at: DateTime<Utc>) {
        self.next_attempt_at = Some(at);
    }

    /// True when a scheduled attempt is due at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.next_attempt_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn op(max: u32) -> RetryableOperation {
        RetryableOperation::new(
            OperationKind::Upload,
            RemotePath::new("/a.txt".to_string()).unwrap(),
            max,
        )
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let mut op = op(3);
        assert!(!op.record_failure(SyncFailure::Timeout));
        assert!(!op.record_failure(SyncFailure::Timeout));
        assert!(op.record_failure(SyncFailure::Timeout));
        assert!(op.record_failure(SyncFailure::Timeout));
        assert_eq!(op.attempt_count(), 3);
        assert!(op.is_terminal());
    }

    #[test]
    fn test_permanent_failure_is_terminal_at_once() {
        let mut op = op(5);
        assert!(op.record_failure(SyncFailure::QuotaExceeded));
        assert_eq!(op.attempt_count(), 1);
        assert_eq!(op.last_failure_class(), Some(FailureClass::Permanent));
    }

    #[test]
    fn test_zero_max_is_raised() {
        assert_eq!(op(0).max_attempts(), 1);
    }

    #[test]
    fn test_is_due() {
        let mut op = op(3);
        let now = Utc::now();
        assert!(!op.is_due(now));
        op.record_failure(SyncFailure::NetworkUnavailable);
        op.schedule_at(now + Duration::seconds(2));
        assert!(!op.is_due(now));
        assert!(op.is_due(now + Duration::seconds(2)));
    }
}
