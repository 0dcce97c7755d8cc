//! Conflict detection logic
//!
//! Decides whether a local item and the remote descriptor reported for the
//! same path have diverged, and if not, which side should win.
//!
//! Rules, in order:
//!
//! 1. kinds differ                                  -> `type` conflict
//! 2. same remote identifier, different names       -> `name` conflict
//! 3. equal fingerprints                            -> in sync
//! 4. both sides changed after the last common sync
//!    point and their timestamps are further apart
//!    than the skew tolerance                       -> `content` conflict
//! 5. otherwise the changed (or newer) side wins; ties go to the remote side

use chrono::Duration;
use tracing::{debug, info};

use cirrus_core::{
    config::{ConflictsConfig, MAX_SKEW_TOLERANCE_MS},
    domain::{ConflictRecord, ConflictType, RemoteDescriptor, SyncItem},
};

/// Result of a detection check
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    /// Both sides hold the same content
    InSync,
    /// Only the local side moved on (or it is newer): upload
    LocalNewer,
    /// Only the remote side moved on (or it is newer): download
    RemoteNewer,
    /// Both sides diverged
    Conflicted(Box<ConflictRecord>),
}

impl DetectionResult {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, DetectionResult::Conflicted(_))
    }
}

/// Detects conflicts between local and remote versions of an item
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    skew_tolerance: Duration,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(Duration::seconds(1))
    }
}

impl ConflictDetector {
    /// Create a detector that ignores timestamp differences up to `skew_tolerance`
    #[must_use]
    pub fn new(skew_tolerance: Duration) -> Self {
        Self { skew_tolerance }
    }

    #[must_use]
    pub fn from_config(config: &ConflictsConfig) -> Self {
        let millis = config.skew_tolerance_ms.min(MAX_SKEW_TOLERANCE_MS);
        Self::new(Duration::milliseconds(i64::try_from(millis).unwrap_or(0)))
    }

    #[must_use]
    pub fn skew_tolerance(&self) -> Duration {
        self.skew_tolerance
    }

    /// Returns the conflict record if the two sides diverged
    #[must_use]
    pub fn detect_conflict(
        &self,
        local: &SyncItem,
        remote: &RemoteDescriptor,
    ) -> Option<ConflictRecord> {
        match self.detect(local, remote) {
            DetectionResult::Conflicted(record) => Some(*record),
            _ => None,
        }
    }

    /// Compare `local` against `remote` and classify the outcome
    #[must_use]
    pub fn detect(&self, local: &SyncItem, remote: &RemoteDescriptor) -> DetectionResult {
        if local.kind() != remote.kind {
            info!(
                path = %local.remote_path(),
                local_kind = %local.kind(),
                remote_kind = %remote.kind,
                "Type conflict detected"
            );
            return self.conflict(local, remote, ConflictType::Type);
        }

        if local.remote_id() == Some(&remote.id) && local.name() != remote.name {
            info!(
                path = %local.remote_path(),
                local_name = %local.name(),
                remote_name = %remote.name,
                "Name conflict detected"
            );
            return self.conflict(local, remote, ConflictType::Name);
        }

        let same_content =
            local.fingerprint().is_some() && local.fingerprint() == remote.fingerprint.as_ref();
        if local.is_folder() || same_content {
            debug!(path = %local.remote_path(), "Fingerprints match, in sync");
            return DetectionResult::InSync;
        }

        let local_changed = local.modified_since_sync(self.skew_tolerance);
        let remote_changed = match local.last_sync() {
            Some(last_sync) => last_sync
                .checked_add_signed(self.skew_tolerance)
                .is_some_and(|bound| remote.modified_at > bound),
            None => true,
        };
        let delta = local.modified_at() - remote.modified_at;

        if local_changed && remote_changed && delta.abs() > self.skew_tolerance {
            info!(
                path = %local.remote_path(),
                local_modified = %local.modified_at(),
                remote_modified = %remote.modified_at,
                "Content conflict detected: both sides changed since last sync"
            );
            return self.conflict(local, remote, ConflictType::Content);
        }

        let result = match (local_changed, remote_changed) {
            (true, false) => DetectionResult::LocalNewer,
            (false, true) => DetectionResult::RemoteNewer,
            _ if delta > self.skew_tolerance => DetectionResult::LocalNewer,
            _ => DetectionResult::RemoteNewer,
        };
        debug!(
            path = %local.remote_path(),
            local_changed,
            remote_changed,
            result = ?result,
            "No conflict"
        );
        result
    }

    fn conflict(
        &self,
        local: &SyncItem,
        remote: &RemoteDescriptor,
        conflict_type: ConflictType,
    ) -> DetectionResult {
        let record = ConflictRecord::new(*local.id(), conflict_type, local.version_info(), remote);
        DetectionResult::Conflicted(Box::new(record))
    }
}
