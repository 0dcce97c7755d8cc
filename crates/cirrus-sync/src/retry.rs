//! Error classification and retry scheduling
//!
//! Transport and filesystem adapters fail with `anyhow::Error`. The
//! [`ErrorClassifier`] turns such an error into a [`SyncFailure`], which
//! carries its transient/permanent class. Transient failures are queued in
//! the [`RetryQueue`] with an exponential backoff from [`RetryPolicy`];
//! permanent failures, and transient ones past the attempt cap, become
//! terminal and are reported instead of retried.
//!
//! ## Classification order
//!
//! 1. A [`SyncFailure`] anywhere in the error chain is taken as is
//! 2. `std::io::Error` kinds and errno values
//! 3. A timeout elapsed inside `tokio::time::timeout`
//! 4. Keywords in the rendered error chain (HTTP status codes, "rate limit", ...)
//! 5. Anything else is [`SyncFailure::Unclassified`], which is permanent

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use cirrus_core::config::RetryConfig;
use cirrus_core::domain::{FailureClass, OperationKind, RemotePath, RetryableOperation, SyncFailure};

// ============================================================================
// Classifier
// ============================================================================

/// ENOSPC
const ERRNO_NO_SPACE: i32 = 28;
/// EBUSY
const ERRNO_BUSY: i32 = 16;
/// ETXTBSY
const ERRNO_TEXT_BUSY: i32 = 26;

/// Maps adapter errors onto the failure taxonomy
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Name the failure behind `err`
    pub fn classify(err: &anyhow::Error) -> SyncFailure {
        for cause in err.chain() {
            if let Some(failure) = cause.downcast_ref::<SyncFailure>() {
                return failure.clone();
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if let Some(failure) = Self::from_io(io_err) {
                    return failure;
                }
            }
            if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                return SyncFailure::Timeout;
            }
        }
        Self::from_message(&format!("{err:#}"))
    }

    /// Transient or permanent
    pub fn class(err: &anyhow::Error) -> FailureClass {
        Self::classify(err).class()
    }

    /// True if retrying `err` later may succeed
    pub fn should_retry(err: &anyhow::Error) -> bool {
        Self::class(err).is_transient()
    }

    fn from_io(err: &io::Error) -> Option<SyncFailure> {
        match err.raw_os_error() {
            Some(ERRNO_NO_SPACE) => return Some(SyncFailure::InsufficientSpace),
            Some(ERRNO_BUSY | ERRNO_TEXT_BUSY) => {
                return Some(SyncFailure::FileInUse(err.to_string()))
            }
            _ => {}
        }

        let failure = match err.kind() {
            io::ErrorKind::PermissionDenied => SyncFailure::PermissionDenied(err.to_string()),
            io::ErrorKind::NotFound => SyncFailure::NotFound(err.to_string()),
            io::ErrorKind::TimedOut => SyncFailure::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => SyncFailure::NetworkUnavailable,
            io::ErrorKind::InvalidData => SyncFailure::MetadataCorrupted,
            _ => return None,
        };
        Some(failure)
    }

    fn from_message(message: &str) -> SyncFailure {
        let text = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
        // Status codes only count as standalone numbers, never inside a name
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let status = |code: u16| tokens.contains(&code.to_string().as_str());

        // Permanent causes first: a message naming one must not be retried
        if status(401) || has(&["unauthorized", "authentication", "token expired"]) {
            return SyncFailure::AuthenticationFailed;
        }
        if status(403) || has(&["forbidden", "permission denied", "access denied"]) {
            return SyncFailure::PermissionDenied(message.to_string());
        }
        if status(507) || has(&["quota", "insufficient storage"]) {
            return SyncFailure::QuotaExceeded;
        }
        if has(&["no space", "disk full"]) {
            return SyncFailure::InsufficientSpace;
        }
        if has(&["checksum", "hash mismatch"]) {
            return SyncFailure::ChecksumMismatch(message.to_string());
        }

        if status(429) || has(&["too many requests", "rate limit", "throttl"]) {
            return SyncFailure::RateLimited;
        }
        if let Some(code) = [500u16, 502, 503, 504].into_iter().find(|c| status(*c)) {
            return SyncFailure::ServerError(code);
        }
        if has(&["server error"]) {
            return SyncFailure::ServerError(500);
        }
        if has(&["timeout", "timed out"]) {
            return SyncFailure::Timeout;
        }
        if has(&["network", "connection", "dns", "reset by peer", "broken pipe"]) {
            return SyncFailure::NetworkUnavailable;
        }
        if has(&["in use", "locked", "busy"]) {
            return SyncFailure::FileInUse(message.to_string());
        }
        if status(404) || has(&["not found"]) {
            return SyncFailure::NotFound(message.to_string());
        }
        SyncFailure::Unclassified(message.to_string())
    }
}

// ============================================================================
// Backoff policy
// ============================================================================

/// Largest exponent used for backoff; higher attempt numbers are clamped
const MAX_EXPONENT: u32 = 20;

/// Exponential backoff bounded by a maximum delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Zero durations are raised to one millisecond so every delay is positive
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(Duration::from_millis(1)),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.max_delay_secs),
            config.max_attempts,
        )
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before retrying after the `attempt`-th failure (1-based)
    ///
    /// `base * 2^(attempt - 1)`, capped at the maximum delay.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Failure counts since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStatistics {
    pub total: u64,
    pub transient: u64,
    pub permanent: u64,
    /// Keyed by [`SyncFailure::kind`]
    pub by_kind: BTreeMap<String, u64>,
    /// Operations that exhausted their attempts or failed permanently
    pub terminal: u64,
}

impl ErrorStatistics {
    fn record(&mut self, failure: &SyncFailure, terminal: bool) {
        self.total += 1;
        match failure.class() {
            FailureClass::Transient => self.transient += 1,
            FailureClass::Permanent => self.permanent += 1,
        }
        *self.by_kind.entry(failure.kind().to_string()).or_insert(0) += 1;
        if terminal {
            self.terminal += 1;
        }
    }
}

// ============================================================================
// Retry queue
// ============================================================================

/// What to do after a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again at `at`
    Retry { at: DateTime<Utc>, attempt: u32 },
    /// Give up and report
    Terminal { attempts: u32 },
}

/// Failed operations waiting for their next attempt, keyed by path
pub struct RetryQueue {
    policy: RetryPolicy,
    operations: DashMap<RemotePath, RetryableOperation>,
    statistics: Mutex<ErrorStatistics>,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            operations: DashMap::new(),
            statistics: Mutex::new(ErrorStatistics::default()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Count a failure of `kind` at `path` and decide whether to retry
    pub fn record_failure(
        &self,
        kind: OperationKind,
        path: &RemotePath,
        failure: SyncFailure,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let mut entry = self
            .operations
            .entry(path.clone())
            .or_insert_with(|| RetryableOperation::new(kind, path.clone(), self.policy.max_attempts));
        if entry.kind() != kind {
            *entry = RetryableOperation::new(kind, path.clone(), self.policy.max_attempts);
        }

        let terminal = entry.record_failure(failure.clone());
        let attempt = entry.attempt_count();
        self.stats_mut(|s| s.record(&failure, terminal));

        if terminal {
            drop(entry);
            self.operations.remove(path);
            warn!(
                path = %path,
                operation = %kind,
                attempts = attempt,
                failure = %failure,
                class = %failure.class(),
                "Operation failed terminally"
            );
            return RetryDecision::Terminal { attempts: attempt };
        }

        let delay = self.policy.next_delay(attempt);
        let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(1));
        entry.schedule_at(at);
        debug!(
            path = %path,
            operation = %kind,
            attempt,
            delay_ms = delay.as_millis() as u64,
            failure = %failure,
            "Transient failure, retry scheduled"
        );
        RetryDecision::Retry { at, attempt }
    }

    /// True while `path` has a retry scheduled after `now`
    pub fn is_waiting(&self, path: &RemotePath, now: DateTime<Utc>) -> bool {
        self.operations
            .get(path)
            .is_some_and(|op| op.next_attempt_at().is_some_and(|at| at > now))
    }

    /// True while `path` has an unresolved failure on record
    pub fn contains(&self, path: &RemotePath) -> bool {
        self.operations.contains_key(path)
    }

    /// Forget `path`, e.g. after a success or a cancellation
    pub fn clear(&self, path: &RemotePath) -> Option<RetryableOperation> {
        self.operations.remove(path).map(|(_, op)| op)
    }

    /// Operations still waiting, soonest first
    pub fn pending(&self) -> Vec<RetryableOperation> {
        let mut pending: Vec<_> = self.operations.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|op| op.next_attempt_at());
        pending
    }

    /// Earliest scheduled attempt
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.operations
            .iter()
            .filter_map(|e| e.value().next_attempt_at())
            .min()
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.statistics
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn stats_mut(&self, f: impl FnOnce(&mut ErrorStatistics)) {
        if let Ok(mut stats) = self.statistics.lock() {
            f(&mut stats);
        }
    }

    /// Paths with a scheduled retry, used when rebuilding state
    pub fn paths(&self) -> HashMap<RemotePath, OperationKind> {
        self.operations
            .iter()
            .map(|e| (e.key().clone(), e.value().kind()))
            .collect()
    }
}
