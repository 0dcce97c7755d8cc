//! User commands: conflict resolution, selective sync, offline pinning

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use cirrus_cache::CacheError;
use cirrus_conflict::{BatchResult, ConflictError, PlanOutcome, PlanTransfers, ResolutionPlan};
use cirrus_core::domain::{
    CacheUpdate, ConflictRecord, ConflictType, ItemKind, OperationKind, RemoteDescriptor, RemotePath,
    ResolutionOption, ResolutionSource, SyncEvent, SyncFailure, SyncItem, SyncPath, SyncState, TransferId,
    VersionInfo,
};
use cirrus_core::ports::{ItemFilter, TransferProgress};

use super::SyncEngine;
use crate::bandwidth::{Direction, TransferPriority};
use crate::error::SyncError;
use crate::retry::ErrorClassifier;
use crate::selective::{FolderTree, SelectionChange};

/// Resolution uploads and downloads, allocated and sealed like any transfer
struct ResolutionTransfers<'a>(&'a SyncEngine);

impl ResolutionTransfers<'_> {
    fn progress(&self, id: TransferId, direction: Direction, size: u64) -> TransferProgress {
        let rate = self.0.bandwidth.allocate(id, direction, TransferPriority::Normal);
        TransferProgress::new(id, size, rate)
    }
}

#[async_trait]
impl PlanTransfers for ResolutionTransfers<'_> {
    async fn upload(
        &self,
        local: &SyncPath,
        remote: &RemotePath,
        version: &VersionInfo,
    ) -> anyhow::Result<RemoteDescriptor> {
        let id = TransferId::new();
        let progress = self.progress(id, Direction::Upload, version.size);
        let seal = version.kind == ItemKind::File;
        let result = self.0.upload_bytes(local, remote, seal, &id, &progress).await;
        self.0.bandwidth.release(&id);
        result
    }

    async fn download(&self, remote: &RemotePath, local: &SyncPath, version: &VersionInfo) -> anyhow::Result<()> {
        let id = TransferId::new();
        let progress = self.progress(id, Direction::Download, version.size);
        let seal = version.kind == ItemKind::File;
        let result = self.0.download_bytes(remote, local, seal, &id, &progress).await;
        self.0.bandwidth.release(&id);
        result
    }
}

impl SyncEngine {
    // ========================================================================
    // Conflict resolution
    // ========================================================================

    /// Resolve the pending conflict at `path` with `option`
    ///
    /// # Errors
    /// - `SyncError::UnknownPath` if nothing is tracked at `path`
    /// - `SyncError::NoConflict` if the item is not in conflict
    /// - `SyncError::OptionNotOffered` if the conflict does not offer `option`
    /// - `SyncError::Conflict` if a step of the plan failed; the item stays
    ///   in conflict
    #[instrument(skip(self), fields(path = %path, option = %option))]
    pub async fn resolve_conflict(&self, path: &RemotePath, option: ResolutionOption) -> Result<(), SyncError> {
        let _guard = self.locks.lock(path).await;
        let item = self.load(path).await?;
        self.resolve_locked(item, option, ResolutionSource::User).await
    }

    /// Resolve every pending conflict that offers `option`
    ///
    /// # Errors
    /// Returns an error only if the pending conflicts cannot be listed
    #[instrument(skip(self))]
    pub async fn resolve_all(&self, option: ResolutionOption) -> Result<BatchResult, SyncError> {
        let mut result = BatchResult::default();
        for record in self.store.get_unresolved_conflicts().await? {
            if !record.offers(option) {
                result.skipped += 1;
                continue;
            }
            let Some(item) = self.store.get_item(record.item_id()).await? else {
                result.skipped += 1;
                continue;
            };
            match self.resolve_conflict(item.remote_path(), option).await {
                Ok(()) => result.resolved += 1,
                Err(SyncError::NoConflict(_)) => result.skipped += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(format!("{}: {e}", item.remote_path()));
                }
            }
        }
        info!(
            resolved = result.resolved,
            failed = result.failed,
            skipped = result.skipped,
            "Batch resolution finished"
        );
        Ok(result)
    }

    /// Resolve the conflict of `item`, whose lock the caller holds
    pub(super) async fn resolve_locked(
        &self,
        mut item: SyncItem,
        option: ResolutionOption,
        source: ResolutionSource,
    ) -> Result<(), SyncError> {
        let path = item.remote_path().clone();
        let Some(record) = item
            .conflict()
            .filter(|_| item.state() == SyncState::Conflict)
            .cloned()
        else {
            return Err(SyncError::NoConflict(path));
        };
        if !record.offers(option) {
            return Err(SyncError::OptionNotOffered { option, path });
        }

        let plan = self.resolver.prepare(&record, option, &self.root, Utc::now()).await?;
        let previous = item.state();
        item.begin_resolution(plan.transfer_state)?;
        self.persist(&item, previous).await?;

        match self
            .resolver
            .execute(&plan, &self.root, &record, &ResolutionTransfers(self))
            .await
        {
            Ok(outcome) => self.finish_resolution(item, &record, &plan, &outcome, source).await,
            Err(err) => {
                let failure = match &err {
                    ConflictError::StepFailed { source, .. } => ErrorClassifier::classify(source),
                    other => SyncFailure::Unclassified(other.to_string()),
                };
                error!(path = %path, option = %option, error = %err, "Conflict resolution failed");
                let during = item.state();
                item.abort_resolution()?;
                self.persist(&item, during).await?;
                self.events.publish(SyncEvent::OperationFailed {
                    operation: OperationKind::Resolve,
                    path,
                    failure,
                    terminal: true,
                });
                Err(err.into())
            }
        }
    }

    /// Bring the item in line with what the executed plan did
    async fn finish_resolution(
        &self,
        mut item: SyncItem,
        record: &ConflictRecord,
        plan: &ResolutionPlan,
        outcome: &PlanOutcome,
        source: ResolutionSource,
    ) -> Result<(), SyncError> {
        if plan.conflict_type == ConflictType::Type {
            return self.replace_after_type_resolution(item, record, plan, outcome, source).await;
        }

        let during = item.state();
        let mut downloaded = false;
        match (plan.conflict_type, plan.option) {
            (ConflictType::Content, ResolutionOption::KeepRemote | ResolutionOption::KeepBoth) => {
                if let Some((state, fingerprint)) = self.local_snapshot(item.local_path()).await? {
                    item.apply_local_change(state.size, state.modified_at, fingerprint);
                }
                item.apply_remote(&record.remote_descriptor());
                downloaded = true;
            }
            (ConflictType::Name, ResolutionOption::KeepRemote) => {
                let target = plan.final_path.clone();
                if let Some(existing) = self.store.get_item_by_path(&target).await? {
                    if existing.id() != item.id() {
                        self.forget(&existing).await?;
                    }
                }
                let from = item.remote_path().clone();
                item.relocate(self.local_path(&target)?, target.clone());
                let root = self.root.clone();
                self.cache.relocate(&from, &target, |p| {
                    root.resolve(p)
                        .map(SyncPath::into_path_buf)
                        .unwrap_or_else(|_| root.as_path().to_path_buf())
                });
                item.apply_remote(&record.remote_descriptor());
                let mut tree = self.tree.write().await;
                tree.remove(&from);
                tree.insert_descriptor(&record.remote_descriptor());
            }
            (conflict_type, option) => {
                // The upload sent whatever was on disk when the plan ran
                if conflict_type == ConflictType::Content && option == ResolutionOption::KeepLocal {
                    if let Some((state, fingerprint)) = self.local_snapshot(item.local_path()).await? {
                        item.apply_local_change(state.size, state.modified_at, fingerprint);
                    }
                }
                if let Some(descriptor) = outcome.remote.get(&plan.final_path) {
                    item.apply_remote(descriptor);
                    self.tree.write().await.insert_descriptor(descriptor);
                }
            }
        }

        let mut resolved = item.resolve_conflict(SyncState::Synced)?;
        resolved.resolve(plan.option, source)?;
        self.store.save_conflict(&resolved).await?;
        self.persist(&item, during).await?;
        if downloaded && !item.is_folder() {
            self.admit(&item);
        }
        info!(
            path = %item.remote_path(),
            option = %plan.option,
            source = %source,
            "Conflict resolved"
        );

        if let Some(extra) = &plan.extra_copy {
            self.track_resolution_copy(extra, record, outcome).await?;
        }

        // A name resolution does not carry local edits made meanwhile
        if plan.conflict_type == ConflictType::Name
            && self.encryption.is_none()
            && item.fingerprint().is_some()
            && item.fingerprint() != item.remote_fingerprint()
        {
            let previous = item.state();
            item.start_upload()?;
            self.persist(&item, previous).await?;
            debug!(path = %item.remote_path(), "Local edits queued after name resolution");
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Track the second copy a keep-both plan created
    async fn track_resolution_copy(
        &self,
        extra: &RemotePath,
        record: &ConflictRecord,
        outcome: &PlanOutcome,
    ) -> Result<(), SyncError> {
        let local = self.local_path(extra)?;
        let Some((state, fingerprint)) = self.local_snapshot(&local).await? else {
            warn!(path = %extra, "Conflict copy missing on disk, not tracked");
            return Ok(());
        };
        if let Some(existing) = self.store.get_item_by_path(extra).await? {
            self.forget(&existing).await?;
        }

        let mut copy = match outcome.remote.get(extra) {
            Some(uploaded) => {
                let mut copy = SyncItem::new_local(
                    local,
                    extra.clone(),
                    state.kind,
                    state.size,
                    state.modified_at,
                    fingerprint,
                )?;
                copy.start_upload()?;
                copy.complete_upload(uploaded)?;
                self.tree.write().await.insert_descriptor(uploaded);
                copy
            }
            None => {
                let descriptor = record.remote_descriptor();
                let mut copy = SyncItem::from_remote(local, &descriptor);
                copy.start_download()?;
                copy.complete_download(state.size, state.modified_at, fingerprint)?;
                self.tree.write().await.insert_descriptor(&descriptor);
                copy
            }
        };
        copy.set_parent_id(self.parent_id(extra).await?);
        self.insert_item(&copy).await?;
        if outcome.downloaded.contains(extra) && !copy.is_folder() {
            self.admit(&copy);
        }
        info!(path = %extra, "Conflict copy tracked");
        Ok(())
    }

    /// A type resolution replaces the item with one of the winning kind
    async fn replace_after_type_resolution(
        &self,
        mut item: SyncItem,
        record: &ConflictRecord,
        plan: &ResolutionPlan,
        outcome: &PlanOutcome,
        source: ResolutionSource,
    ) -> Result<(), SyncError> {
        let path = item.remote_path().clone();
        let local = item.local_path().clone();
        let Some((state, fingerprint)) = self.local_snapshot(&local).await? else {
            return Err(SyncError::Other(anyhow::anyhow!(
                "local copy of {path} missing after resolution"
            )));
        };

        let mut replacement = match plan.option {
            ResolutionOption::KeepLocal => {
                let Some(uploaded) = outcome.remote.values().next() else {
                    return Err(SyncError::Other(anyhow::anyhow!(
                        "upload of {path} returned no descriptor"
                    )));
                };
                let mut fresh = SyncItem::new_local(
                    local,
                    path.clone(),
                    state.kind,
                    state.size,
                    state.modified_at,
                    fingerprint,
                )?;
                fresh.start_upload()?;
                fresh.complete_upload(uploaded)?;
                fresh
            }
            _ => {
                let mut fresh = SyncItem::from_remote(local, &record.remote_descriptor());
                fresh.start_download()?;
                fresh.complete_download(state.size, state.modified_at, fingerprint)?;
                fresh
            }
        };
        replacement.set_parent_id(item.parent_id().copied());
        replacement.set_selected(item.is_selected());

        let during = item.state();
        let mut resolved = item.resolve_conflict(SyncState::Synced)?;
        resolved.resolve(plan.option, source)?;
        self.store.save_conflict(&resolved).await?;
        self.store.delete_item(item.id()).await?;
        self.insert_item(&replacement).await?;
        self.events.publish(SyncEvent::state_changed(
            path.clone(),
            *replacement.id(),
            during,
            replacement.state(),
        ));

        // Descendants of the losing folder no longer exist
        let stale = match plan.option {
            ResolutionOption::KeepLocal => SyncState::CloudOnly,
            _ => SyncState::LocalOnly,
        };
        for child in self.descendants(&path).await? {
            if child.state() == stale {
                self.forget(&child).await?;
            }
        }

        let descriptor = outcome
            .remote
            .values()
            .next()
            .cloned()
            .unwrap_or_else(|| record.remote_descriptor());
        let mut tree = self.tree.write().await;
        tree.remove(&path);
        tree.insert_descriptor(&descriptor);
        drop(tree);

        if replacement.kind() == ItemKind::File && plan.option != ResolutionOption::KeepLocal {
            self.admit(&replacement);
        }
        info!(path = %path, option = %plan.option, kind = %replacement.kind(), "Type conflict resolved");
        Ok(())
    }

    // ========================================================================
    // Selective sync
    // ========================================================================

    /// Include or exclude the remote subtree at `path`
    ///
    /// The new selection is persisted before any local file is touched.
    /// Deselecting deletes unchanged synchronized copies and cancels
    /// downloads; local-only, uploading, conflicted and failed items keep
    /// their data. Selecting queues downloads of cloud-only files.
    ///
    /// # Errors
    /// Returns an error if the selection cannot be persisted
    #[instrument(skip(self), fields(path = %path, selected))]
    pub async fn select(&self, path: &RemotePath, selected: bool) -> Result<SelectionChange, SyncError> {
        let change = {
            let mut tree = self.tree.write().await;
            let mut next = tree.clone();
            let change = next.select(path, selected);
            self.store.save_selection(&next.explicit_selection()).await?;
            *tree = next;
            change
        };
        info!(
            folders = change.changed.len(),
            affected_bytes = change.affected_bytes,
            "Selection committed"
        );
        self.events.publish(SyncEvent::SelectionChanged {
            path: path.clone(),
            selected,
            affected_bytes: change.affected_bytes,
        });

        let mut items = self
            .store
            .query_items(&ItemFilter::new().with_path_prefix(path.clone()))
            .await?;
        // Parents first when selecting, children first when deselecting
        items.sort_by_key(|i| i.remote_path().depth());
        if !selected {
            items.reverse();
        }

        for candidate in items {
            let item_path = candidate.remote_path().clone();
            let _guard = self.locks.lock(&item_path).await;
            let Some(item) = self.store.get_item_by_path(&item_path).await? else {
                continue;
            };
            if selected {
                self.include(item).await?;
            } else {
                self.exclude(item).await?;
            }
        }

        if !selected {
            for entry in self.cache.invalidate(path) {
                self.events.publish(SyncEvent::CacheUpdated {
                    path: entry.path().clone(),
                    update: CacheUpdate::Removed,
                    size: entry.size(),
                });
            }
        }
        self.wake.notify_one();
        Ok(change)
    }

    async fn include(&self, mut item: SyncItem) -> Result<(), SyncError> {
        let previous = item.state();
        item.set_selected(true);
        if previous == SyncState::CloudOnly {
            item.start_download()?;
        }
        self.persist(&item, previous).await
    }

    async fn exclude(&self, mut item: SyncItem) -> Result<(), SyncError> {
        let path = item.remote_path().clone();
        let previous = item.state();

        if previous == SyncState::Downloading && item.conflict().is_none() {
            self.abort_active(&path);
            item.cancel_transfer()?;
            self.retry.clear(&path);
        }

        if item.state() == SyncState::Synced && item.remote_id().is_some() {
            let releasable = if item.is_folder() {
                self.descendants(&path)
                    .await?
                    .iter()
                    .all(|c| c.state() == SyncState::CloudOnly)
            } else {
                !self.locally_modified(&item).await?
            };
            if releasable {
                self.filesystem.delete(item.local_path()).await?;
                item.detach_local()?;
                debug!(path = %path, "Local copy removed by deselection");
            }
        }

        item.set_selected(false);
        self.persist(&item, previous).await
    }

    /// Rebuild the folder tree from a full remote listing
    ///
    /// Returns the number of folders in the new tree.
    ///
    /// # Errors
    /// Returns an error if a listing fails
    #[instrument(skip(self))]
    pub async fn refresh_tree(&self) -> Result<usize, SyncError> {
        let mut listing = Vec::new();
        let mut pending = VecDeque::from([RemotePath::root()]);
        while let Some(folder) = pending.pop_front() {
            for descriptor in self.transport.list_folder(&folder).await? {
                if descriptor.is_folder() {
                    pending.push_back(descriptor.path.clone());
                }
                listing.push(descriptor);
            }
        }

        let mut tree = FolderTree::from_listing(listing.iter());
        tree.apply_selection(&self.store.load_selection().await?);
        let folders = tree.len();
        *self.tree.write().await = tree;
        info!(folders, objects = listing.len(), "Folder tree refreshed");
        Ok(folders)
    }

    // ========================================================================
    // Offline availability
    // ========================================================================

    /// Keep the files at or under `path` available offline
    ///
    /// Cloud-only files are queued for download; pinned files are never
    /// evicted. Returns the number of files pinned.
    ///
    /// # Errors
    /// Returns `SyncError::UnknownPath` if nothing is tracked at `path`
    #[instrument(skip(self), fields(path = %path))]
    pub async fn pin(&self, path: &RemotePath) -> Result<usize, SyncError> {
        self.load(path).await?;
        let files = self
            .store
            .query_items(
                &ItemFilter::new()
                    .with_path_prefix(path.clone())
                    .with_kind(ItemKind::File),
            )
            .await?;

        let mut pinned = 0;
        for candidate in files {
            let file_path = candidate.remote_path().clone();
            let _guard = self.locks.lock(&file_path).await;
            let Some(mut item) = self.store.get_item_by_path(&file_path).await? else {
                continue;
            };
            let previous = item.state();
            let cached = self.cache.pin(&file_path);
            item.set_offline(true);
            if previous == SyncState::CloudOnly && item.is_selected() {
                item.start_download()?;
            }
            self.persist(&item, previous).await?;
            if cached {
                self.events.publish(SyncEvent::CacheUpdated {
                    path: file_path,
                    update: CacheUpdate::Updated,
                    size: item.size(),
                });
            }
            pinned += 1;
        }
        info!(pinned, "Pinned for offline use");
        self.wake.notify_one();
        Ok(pinned)
    }

    /// Make the files at or under `path` evictable again
    ///
    /// # Errors
    /// Returns `SyncError::UnknownPath` if nothing is tracked at `path`
    #[instrument(skip(self), fields(path = %path))]
    pub async fn unpin(&self, path: &RemotePath) -> Result<usize, SyncError> {
        self.load(path).await?;
        let files = self
            .store
            .query_items(
                &ItemFilter::new()
                    .with_path_prefix(path.clone())
                    .with_kind(ItemKind::File),
            )
            .await?;

        let mut unpinned = 0;
        for candidate in files {
            let file_path = candidate.remote_path().clone();
            let _guard = self.locks.lock(&file_path).await;
            let Some(mut item) = self.store.get_item_by_path(&file_path).await? else {
                continue;
            };
            if self.cache.unpin(&file_path) || item.is_offline() {
                item.set_offline(false);
                self.store.save_item(&item).await?;
                unpinned += 1;
            }
        }
        info!(unpinned, "Unpinned");
        Ok(unpinned)
    }

    /// Evict local copies until the cache holds at most `max_bytes`
    ///
    /// Returns the paths whose local copy was released.
    ///
    /// # Errors
    /// Returns `SyncError::Cache` with `CacheError::BudgetUnreachable` when
    /// pinned files alone exceed `max_bytes`; everything evictable has been
    /// released by then.
    #[instrument(skip(self))]
    pub async fn enforce_cache_budget(&self, max_bytes: u64) -> Result<Vec<RemotePath>, SyncError> {
        match self.cache.enforce_budget(max_bytes, Utc::now()) {
            Ok(evicted) => {
                let paths = evicted.iter().map(|e| e.path().clone()).collect();
                self.release_evicted(evicted).await;
                Ok(paths)
            }
            Err(CacheError::BudgetUnreachable {
                used_bytes,
                budget_bytes,
                evicted,
            }) => {
                self.release_evicted(evicted.clone()).await;
                self.events.publish(SyncEvent::CacheOverBudget {
                    used_bytes,
                    budget_bytes,
                });
                warn!(used_bytes, budget_bytes, "Pinned files exceed the cache budget");
                Err(CacheError::BudgetUnreachable {
                    used_bytes,
                    budget_bytes,
                    evicted,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
