//! Conflict resolution plans and their execution
//!
//! [`ConflictResolver::resolve`] turns a (record, option) pair into a
//! [`ResolutionPlan`]: an ordered list of file operations on logical paths.
//! [`ConflictResolver::execute`] runs a plan against the transport and the
//! local filesystem. Content moves through the caller's [`PlanTransfers`],
//! which applies bandwidth limits and encryption the same way regular
//! transfers do. Updating the item and clearing the record is left to the
//! caller, which does so only after every step succeeded.
//!
//! | type    | keep-local                 | keep-remote               | keep-both                                    |
//! |---------|----------------------------|---------------------------|----------------------------------------------|
//! | content | upload                     | download                  | rename local to copy, upload copy, download  |
//! | name    | move remote to local name  | rename local to remote    | upload local name, download remote name      |
//! | type    | delete remote, upload      | delete local, download    | (not offered)                                |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cirrus_core::{
    domain::{
        ConflictId, ConflictRecord, ConflictType, RemoteDescriptor, RemotePath, ResolutionOption,
        SyncPath, SyncState, UniqueId, VersionInfo,
    },
    ports::{ILocalFileSystem, ITransport},
};

use crate::{error::ConflictError, namer::ConflictNamer};

/// Moves file content for the upload and download steps of a plan
///
/// `version` describes the side being sent: the local version for uploads,
/// the remote one for downloads.
#[async_trait]
pub trait PlanTransfers: Send + Sync {
    async fn upload(
        &self,
        local: &SyncPath,
        remote: &RemotePath,
        version: &VersionInfo,
    ) -> anyhow::Result<RemoteDescriptor>;

    async fn download(&self, remote: &RemotePath, local: &SyncPath, version: &VersionInfo) -> anyhow::Result<()>;
}

// ============================================================================
// Plans
// ============================================================================

/// A single file operation of a resolution plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOperation {
    /// Upload the local copy at `local` to `remote`
    Upload { local: RemotePath, remote: RemotePath },
    /// Download `remote` into the local copy at `local`
    Download { remote: RemotePath, local: RemotePath },
    /// Rename a local file
    RenameLocal { from: RemotePath, to: RemotePath },
    /// Move a remote object
    MoveRemote { from: RemotePath, to: RemotePath },
    DeleteRemote { path: RemotePath },
    DeleteLocal { path: RemotePath },
}

impl PlanOperation {
    /// Short name used in logs and errors
    #[must_use]
    pub fn step(&self) -> &'static str {
        match self {
            PlanOperation::Upload { .. } => "upload",
            PlanOperation::Download { .. } => "download",
            PlanOperation::RenameLocal { .. } => "rename_local",
            PlanOperation::MoveRemote { .. } => "move_remote",
            PlanOperation::DeleteRemote { .. } => "delete_remote",
            PlanOperation::DeleteLocal { .. } => "delete_local",
        }
    }
}

/// The concrete work that realizes a chosen resolution option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub conflict_id: ConflictId,
    pub item_id: UniqueId,
    pub conflict_type: ConflictType,
    pub option: ResolutionOption,
    /// Operations in execution order
    pub operations: Vec<PlanOperation>,
    /// Logical path of the item once the plan completed
    pub final_path: RemotePath,
    /// Transfer state the item passes through while the plan runs
    pub transfer_state: SyncState,
    /// Second copy created by a keep-both plan, tracked as a separate item
    pub extra_copy: Option<RemotePath>,
}

/// What a successful plan produced
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    /// Descriptors returned by uploads and remote moves, by remote path
    pub remote: BTreeMap<RemotePath, RemoteDescriptor>,
    /// Local paths written by downloads
    pub downloaded: Vec<RemotePath>,
}

/// Result of a batch resolution operation
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub resolved: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
}

// ============================================================================
// Resolver
// ============================================================================

/// Builds and applies resolution plans
pub struct ConflictResolver {
    transport: Arc<dyn ITransport>,
    filesystem: Arc<dyn ILocalFileSystem>,
}

impl ConflictResolver {
    pub fn new(transport: Arc<dyn ITransport>, filesystem: Arc<dyn ILocalFileSystem>) -> Self {
        Self {
            transport,
            filesystem,
        }
    }

    /// Plan `option` for `record`, naming any conflict copy after the current time
    ///
    /// # Panics
    /// Panics if `record` does not offer `option`. Callers must only pass
    /// options taken from [`ConflictRecord::options`].
    #[must_use]
    pub fn resolve(record: &ConflictRecord, option: ResolutionOption) -> ResolutionPlan {
        let name = record.local().name.clone();
        Self::plan(record, option, ConflictNamer::generate(&name, Utc::now()))
    }

    /// Plan `option` for `record` using `copy_name` for a keep-both copy
    ///
    /// # Panics
    /// Panics if `record` does not offer `option`.
    #[must_use]
    pub fn plan(record: &ConflictRecord, option: ResolutionOption, copy_name: String) -> ResolutionPlan {
        assert!(
            record.offers(option),
            "{option} is not a resolution option of {} conflict {}",
            record.conflict_type(),
            record.id()
        );

        let local = record.local().path.clone();
        let remote = record.remote().path.clone();
        let conflict_copy = local
            .parent()
            .unwrap_or_else(RemotePath::root)
            .join(&copy_name)
            .unwrap_or_else(|_| local.clone());

        use ConflictType as T;
        use ResolutionOption as O;
        let (operations, final_path, transfer_state, extra_copy) =
            match (record.conflict_type(), option) {
                (T::Content, O::KeepLocal) => (
                    vec![PlanOperation::Upload {
                        local: local.clone(),
                        remote: local.clone(),
                    }],
                    local,
                    SyncState::Uploading,
                    None,
                ),
                (T::Content, O::KeepRemote) => (
                    vec![PlanOperation::Download {
                        remote: remote.clone(),
                        local: local.clone(),
                    }],
                    local,
                    SyncState::Downloading,
                    None,
                ),
                (T::Content, O::KeepBoth) => (
                    vec![
                        PlanOperation::RenameLocal {
                            from: local.clone(),
                            to: conflict_copy.clone(),
                        },
                        PlanOperation::Upload {
                            local: conflict_copy.clone(),
                            remote: conflict_copy.clone(),
                        },
                        PlanOperation::Download {
                            remote: remote.clone(),
                            local: local.clone(),
                        },
                    ],
                    local,
                    SyncState::Downloading,
                    Some(conflict_copy),
                ),
                (T::Name, O::KeepLocal) => (
                    vec![PlanOperation::MoveRemote {
                        from: remote,
                        to: local.clone(),
                    }],
                    local,
                    SyncState::Uploading,
                    None,
                ),
                (T::Name, O::KeepRemote) => (
                    vec![PlanOperation::RenameLocal {
                        from: local,
                        to: remote.clone(),
                    }],
                    remote,
                    SyncState::Downloading,
                    None,
                ),
                (T::Name, O::KeepBoth) => (
                    vec![
                        PlanOperation::Upload {
                            local: local.clone(),
                            remote: local.clone(),
                        },
                        PlanOperation::Download {
                            remote: remote.clone(),
                            local: remote.clone(),
                        },
                    ],
                    local,
                    SyncState::Uploading,
                    Some(remote),
                ),
                (T::Type, O::KeepLocal) => (
                    vec![
                        PlanOperation::DeleteRemote {
                            path: remote.clone(),
                        },
                        PlanOperation::Upload {
                            local: local.clone(),
                            remote,
                        },
                    ],
                    local,
                    SyncState::Uploading,
                    None,
                ),
                (T::Type, O::KeepRemote) => (
                    vec![
                        PlanOperation::DeleteLocal {
                            path: local.clone(),
                        },
                        PlanOperation::Download {
                            remote,
                            local: local.clone(),
                        },
                    ],
                    local,
                    SyncState::Downloading,
                    None,
                ),
                (T::Type, O::KeepBoth) => unreachable!("type conflicts never offer keep-both"),
            };

        ResolutionPlan {
            conflict_id: *record.id(),
            item_id: *record.item_id(),
            conflict_type: record.conflict_type(),
            option,
            operations,
            final_path,
            transfer_state,
            extra_copy,
        }
    }

    /// Plan `option` for `record`, picking a conflict copy name that does
    /// not exist locally yet
    ///
    /// # Panics
    /// Panics if `record` does not offer `option`.
    pub async fn prepare(
        &self,
        record: &ConflictRecord,
        option: ResolutionOption,
        root: &SyncPath,
        at: DateTime<Utc>,
    ) -> Result<ResolutionPlan, ConflictError> {
        let name = record.local().name.clone();
        if option != ResolutionOption::KeepBoth || record.conflict_type() != ConflictType::Content {
            return Ok(Self::plan(record, option, ConflictNamer::generate(&name, at)));
        }

        let parent = record.path().parent().unwrap_or_else(RemotePath::root);
        for n in 1..=ConflictNamer::max_suffix() {
            let candidate = ConflictNamer::candidate(&name, at, n);
            let logical = parent.join(&candidate)?;
            let local = root.resolve(&logical)?;
            let taken = self
                .filesystem
                .exists(&local)
                .await
                .map_err(|source| ConflictError::StepFailed {
                    step: "check_conflict_copy".to_string(),
                    source,
                })?;
            if !taken {
                return Ok(Self::plan(record, option, candidate));
            }
        }
        Ok(Self::plan(record, option, ConflictNamer::fallback(&name, at)))
    }

    /// Run every operation of `plan`, stopping at the first failure
    ///
    /// Uploads and downloads go through `transfers`; moves and deletions go
    /// straight to the transport and the filesystem.
    pub async fn execute(
        &self,
        plan: &ResolutionPlan,
        root: &SyncPath,
        record: &ConflictRecord,
        transfers: &dyn PlanTransfers,
    ) -> Result<PlanOutcome, ConflictError> {
        info!(
            conflict_id = %plan.conflict_id,
            option = %plan.option,
            path = %record.path(),
            steps = plan.operations.len(),
            "Applying conflict resolution"
        );

        let mut outcome = PlanOutcome::default();
        for operation in &plan.operations {
            debug!(step = operation.step(), op = ?operation, "Resolution step");
            self.run(operation, root, record, transfers, &mut outcome)
                .await
                .map_err(|source| {
                    warn!(
                        conflict_id = %plan.conflict_id,
                        step = operation.step(),
                        error = %source,
                        "Resolution step failed"
                    );
                    ConflictError::StepFailed {
                        step: operation.step().to_string(),
                        source,
                    }
                })?;
        }

        info!(conflict_id = %plan.conflict_id, "Resolution plan completed");
        Ok(outcome)
    }

    async fn run(
        &self,
        operation: &PlanOperation,
        root: &SyncPath,
        record: &ConflictRecord,
        transfers: &dyn PlanTransfers,
        outcome: &mut PlanOutcome,
    ) -> anyhow::Result<()> {
        match operation {
            PlanOperation::Upload { local, remote } => {
                let descriptor = transfers
                    .upload(&root.resolve(local)?, remote, record.local())
                    .await?;
                outcome.remote.insert(remote.clone(), descriptor);
            }
            PlanOperation::Download { remote, local } => {
                transfers
                    .download(remote, &root.resolve(local)?, record.remote())
                    .await?;
                outcome.downloaded.push(local.clone());
            }
            PlanOperation::RenameLocal { from, to } => {
                self.filesystem
                    .rename(&root.resolve(from)?, &root.resolve(to)?)
                    .await?;
            }
            PlanOperation::MoveRemote { from, to } => {
                let descriptor = self.transport.move_item(from, to).await?;
                outcome.remote.insert(to.clone(), descriptor);
            }
            PlanOperation::DeleteRemote { path } => {
                self.transport.delete(path).await?;
            }
            PlanOperation::DeleteLocal { path } => {
                self.filesystem.delete(&root.resolve(path)?).await?;
            }
        }
        Ok(())
    }
}
