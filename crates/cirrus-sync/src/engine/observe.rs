//! Applying change events to items
//!
//! [`SyncEngine::observe`] takes the item lock, defers events for busy
//! items, and dispatches to one handler per (origin, kind). Handlers only
//! record state and queue transfers; the bytes move in the next tick.

use chrono::Utc;
use tracing::{debug, info, instrument, trace, warn};

use cirrus_conflict::DetectionResult;
use cirrus_core::domain::{
    CacheUpdate, ChangeEvent, ChangeKind, ChangeOrigin, ConflictRecord, ConflictType, FileHash,
    ItemChangeKind, RemoteDescriptor, RemotePath, ResolutionSource, SyncEvent, SyncItem, SyncPath,
    SyncState, VersionInfo,
};
use cirrus_core::ports::{FileSystemState, ItemFilter};

use super::{remote_descriptor_of, subject_path, SyncEngine};
use crate::error::SyncError;

/// Local version built from what is on disk
fn on_disk_version(
    path: &RemotePath,
    state: &FileSystemState,
    fingerprint: Option<FileHash>,
) -> VersionInfo {
    VersionInfo {
        path: path.clone(),
        name: path.file_name().unwrap_or_default().to_string(),
        kind: state.kind,
        size: state.size,
        modified_at: state.modified_at,
        fingerprint,
    }
}

impl SyncEngine {
    /// Apply one change from the local watcher or the remote change listing
    ///
    /// Local changes observed while the network is down are queued and
    /// applied by [`SyncEngine::set_network_available`].
    ///
    /// # Errors
    /// Returns an error if the item store or the filesystem fails
    #[instrument(skip(self, event), fields(path = %event.path, origin = %event.origin))]
    pub async fn observe(&self, event: ChangeEvent) -> Result<(), SyncError> {
        if self.is_excluded(&event.path) {
            trace!("Excluded path ignored");
            return Ok(());
        }
        if event.is_local() && !self.is_online() {
            debug!("Offline, local change queued");
            self.offline_queue.push(event);
            return Ok(());
        }

        let subject = subject_path(&event).clone();
        let _guards = match &event.kind {
            ChangeKind::Moved { from } => self.locks.lock_many(&[from, &event.path]).await,
            _ => vec![self.locks.lock(&event.path).await],
        };

        if let Some(item) = self.store.get_item_by_path(&subject).await? {
            if self.is_busy(&item) {
                debug!(state = %item.state(), "Item busy, change deferred");
                self.deferred.insert((event.origin, subject), event);
                return Ok(());
            }
            if item.state().is_transferring() {
                if self.is_duplicate(&item, &event).await? {
                    trace!("Change already queued");
                    return Ok(());
                }
                self.requeue(item).await?;
            }
        }

        match (event.origin, event.kind) {
            (ChangeOrigin::Local, ChangeKind::Created | ChangeKind::Modified) => {
                self.local_upsert(&event.path).await
            }
            (ChangeOrigin::Local, ChangeKind::Deleted) => self.local_delete(&event.path).await,
            (ChangeOrigin::Local, ChangeKind::Moved { from }) => {
                self.local_move(&from, &event.path).await
            }
            (ChangeOrigin::Remote, ChangeKind::Deleted) => self.remote_delete(&event.path).await,
            (ChangeOrigin::Remote, kind) => {
                let Some(descriptor) = event.remote else {
                    warn!("Remote change without metadata ignored");
                    return Ok(());
                };
                match kind {
                    ChangeKind::Moved { from } => self.remote_move(&from, &descriptor).await,
                    _ => self.remote_upsert(&descriptor).await,
                }
            }
        }
    }

    /// True if a queued transfer already covers `event`
    async fn is_duplicate(&self, item: &SyncItem, event: &ChangeEvent) -> Result<bool, SyncError> {
        if !matches!(event.kind, ChangeKind::Created | ChangeKind::Modified) {
            return Ok(false);
        }
        match (event.origin, item.state()) {
            (ChangeOrigin::Local, SyncState::Uploading) => {
                let Some((state, fingerprint)) = self.local_snapshot(item.local_path()).await? else {
                    return Ok(false);
                };
                Ok(state.kind == item.kind()
                    && (item.is_folder() || (fingerprint.is_some() && fingerprint.as_ref() == item.fingerprint())))
            }
            (ChangeOrigin::Remote, SyncState::Downloading) => Ok(event.remote.as_ref().is_some_and(|d| {
                d.kind == item.kind()
                    && item.remote_id() == Some(&d.id)
                    && d.fingerprint.as_ref() == item.remote_fingerprint()
            })),
            _ => Ok(false),
        }
    }

    /// Drop a queued transfer that a newer change supersedes
    async fn requeue(&self, mut item: SyncItem) -> Result<(), SyncError> {
        let previous = item.state();
        item.cancel_transfer()?;
        self.retry.clear(item.remote_path());
        self.persist(&item, previous).await?;
        debug!(path = %item.remote_path(), "Queued transfer superseded");
        Ok(())
    }

    /// Put `item` into conflict and apply the automatic policy, if any
    pub(super) async fn enter_conflict(
        &self,
        mut item: SyncItem,
        record: ConflictRecord,
        previous: SyncState,
    ) -> Result<(), SyncError> {
        // Only transfer and synced states can move into conflict
        match item.state() {
            SyncState::LocalOnly | SyncState::Error => item.start_upload()?,
            SyncState::CloudOnly => item.start_download()?,
            _ => {}
        }
        item.mark_conflict(record.clone())?;
        self.store.save_conflict(&record).await?;
        self.persist(&item, previous).await?;
        warn!(
            path = %item.remote_path(),
            conflict_type = %record.conflict_type(),
            conflict_id = %record.id(),
            "Conflict detected"
        );
        self.events
            .publish(SyncEvent::ConflictDetected(Box::new(record.clone())));

        if let Some(option) = self.policy.auto_resolution(&record) {
            info!(path = %item.remote_path(), option = %option, "Resolving conflict by policy");
            if let Err(e) = self.resolve_locked(item, option, ResolutionSource::Policy).await {
                warn!(error = %e, "Automatic resolution failed, conflict left for the user");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Local changes
    // ========================================================================

    async fn local_upsert(&self, path: &RemotePath) -> Result<(), SyncError> {
        let local = self.local_path(path)?;
        let Some((state, fingerprint)) = self.local_snapshot(&local).await? else {
            debug!(path = %path, "Local path vanished before it was read");
            return Ok(());
        };
        let Some(mut item) = self.store.get_item_by_path(path).await? else {
            return self.track_local(path, local, &state, fingerprint).await;
        };
        self.cache.touch(path, Utc::now());
        let previous = item.state();

        if item.kind() != state.kind {
            return self.local_kind_changed(item, &state, fingerprint).await;
        }

        if item.is_folder() {
            if previous == SyncState::CloudOnly {
                item.start_download()?;
                item.complete_download(0, state.modified_at, None)?;
                self.persist(&item, previous).await?;
                debug!(path = %path, "Local folder matched remote folder");
            }
            return Ok(());
        }

        // A resting local-only item has never been uploaded, so even unchanged
        // content still needs a transfer
        let unchanged = fingerprint.is_some() && fingerprint.as_ref() == item.fingerprint();
        if unchanged && matches!(previous, SyncState::Synced | SyncState::Error) {
            trace!(path = %path, "Local content unchanged");
            return Ok(());
        }

        match previous {
            SyncState::LocalOnly | SyncState::Synced | SyncState::Error => {
                item.start_upload_of(state.size, state.modified_at, fingerprint)?;
                self.persist(&item, previous).await?;
                self.publish_change(&item, ItemChangeKind::Modified);
                debug!(path = %path, size = state.size, "Local change queued for upload");
            }
            SyncState::CloudOnly => {
                if fingerprint.is_some() && fingerprint.as_ref() == item.remote_fingerprint() {
                    item.start_download()?;
                    item.complete_download(state.size, state.modified_at, fingerprint)?;
                    self.persist(&item, previous).await?;
                    self.admit(&item);
                    debug!(path = %path, "Local copy matches remote content");
                    return Ok(());
                }
                let Some(remote) = remote_descriptor_of(&item) else {
                    return Ok(());
                };
                item.apply_local_change(state.size, state.modified_at, fingerprint);
                let record = ConflictRecord::new(*item.id(), ConflictType::Content, item.version_info(), &remote);
                self.enter_conflict(item, record, previous).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Start tracking a file or folder that appeared locally
    async fn track_local(
        &self,
        path: &RemotePath,
        local: SyncPath,
        state: &FileSystemState,
        fingerprint: Option<FileHash>,
    ) -> Result<(), SyncError> {
        if !self.is_selected(path).await {
            debug!(path = %path, "Outside the selection, not tracked");
            return Ok(());
        }

        let mut item = SyncItem::new_local(
            local,
            path.clone(),
            state.kind,
            state.size,
            state.modified_at,
            fingerprint,
        )?;
        item.set_parent_id(self.parent_id(path).await?);
        self.insert_item(&item).await?;

        let previous = item.state();
        item.start_upload()?;
        self.persist(&item, previous).await?;
        info!(path = %path, kind = %item.kind(), size = item.size(), "New local item queued for upload");
        Ok(())
    }

    /// A tracked path turned from file to folder or back
    async fn local_kind_changed(
        &self,
        item: SyncItem,
        state: &FileSystemState,
        fingerprint: Option<FileHash>,
    ) -> Result<(), SyncError> {
        let Some(remote) = remote_descriptor_of(&item) else {
            // Never uploaded, nothing to reconcile
            let path = item.remote_path().clone();
            let local = item.local_path().clone();
            self.forget(&item).await?;
            return self.track_local(&path, local, state, fingerprint).await;
        };

        let previous = item.state();
        let local = on_disk_version(item.remote_path(), state, fingerprint);
        let record = ConflictRecord::new(*item.id(), ConflictType::Type, local, &remote);
        self.enter_conflict(item, record, previous).await
    }

    async fn local_delete(&self, path: &RemotePath) -> Result<(), SyncError> {
        let Some(item) = self.store.get_item_by_path(path).await? else {
            trace!(path = %path, "Untracked path deleted");
            return Ok(());
        };

        if item.is_folder() {
            for child in self.descendants(path).await? {
                let _guard = self.locks.lock(child.remote_path()).await;
                let Some(child) = self.store.get_item_by_path(child.remote_path()).await? else {
                    continue;
                };
                if let Some(child) = self.settle(child).await? {
                    self.local_delete_one(child).await?;
                }
            }
        }
        self.local_delete_one(item).await
    }

    /// Bring `item` to a resting state, or `None` if it must not be touched
    async fn settle(&self, mut item: SyncItem) -> Result<Option<SyncItem>, SyncError> {
        if item.conflict().is_some() || item.state() == SyncState::Paused {
            return Ok(None);
        }
        if item.state().is_transferring() {
            let previous = item.state();
            self.abort_active(item.remote_path());
            item.cancel_transfer()?;
            self.retry.clear(item.remote_path());
            self.persist(&item, previous).await?;
        }
        Ok(Some(item))
    }

    async fn local_delete_one(&self, mut item: SyncItem) -> Result<(), SyncError> {
        let path = item.remote_path().clone();
        match item.state() {
            SyncState::LocalOnly => {
                self.forget(&item).await?;
                info!(path = %path, "Local-only item deleted");
            }
            SyncState::Synced | SyncState::Error if item.remote_id().is_some() => {
                item.mark_absent(true, false);
                self.store.save_item(&item).await?;
                if let Some(entry) = self.cache.remove(&path) {
                    self.events.publish(SyncEvent::CacheUpdated {
                        path: path.clone(),
                        update: CacheUpdate::Removed,
                        size: entry.size(),
                    });
                }
                info!(path = %path, "Local deletion recorded, remote deletion pending");
                self.wake.notify_one();
            }
            SyncState::Synced | SyncState::Error => self.forget(&item).await?,
            _ => trace!(path = %path, state = %item.state(), "No local copy to delete"),
        }
        Ok(())
    }

    async fn local_move(&self, from: &RemotePath, to: &RemotePath) -> Result<(), SyncError> {
        let Some(item) = self.store.get_item_by_path(from).await? else {
            return self.local_upsert(to).await;
        };
        if self.store.get_item_by_path(to).await?.is_some() {
            self.local_delete(from).await?;
            return self.local_upsert(to).await;
        }

        match item.state() {
            SyncState::Synced if item.remote_id().is_some() => match self.transport.move_item(from, to).await {
                Ok(descriptor) => {
                    self.relocate_subtree(from, to).await?;
                    self.record_moved(to, &descriptor).await?;
                    info!(from = %from, to = %to, "Local move propagated to remote");
                    Ok(())
                }
                Err(e) => {
                    warn!(from = %from, to = %to, error = %e, "Remote move failed, uploading under the new path");
                    self.local_delete(from).await?;
                    self.local_upsert(to).await
                }
            },
            SyncState::LocalOnly | SyncState::Error if item.remote_id().is_none() => {
                self.relocate_subtree(from, to).await?;
                if let Some(mut moved) = self.store.get_item_by_path(to).await? {
                    let previous = moved.state();
                    moved.set_parent_id(self.parent_id(to).await?);
                    if previous == SyncState::LocalOnly || previous == SyncState::Error {
                        moved.start_upload()?;
                    }
                    self.persist(&moved, previous).await?;
                }
                debug!(from = %from, to = %to, "Unsynced item moved");
                Ok(())
            }
            SyncState::CloudOnly => self.local_upsert(to).await,
            _ => {
                self.local_delete(from).await?;
                self.local_upsert(to).await
            }
        }
    }

    /// Rebase every item under `from` onto `to`
    ///
    /// Running transfers below `from` are interrupted and restart from the
    /// new location on the next tick.
    pub(super) async fn relocate_subtree(&self, from: &RemotePath, to: &RemotePath) -> Result<(), SyncError> {
        let items = self
            .store
            .query_items(&ItemFilter::new().with_path_prefix(from.clone()))
            .await?;

        let mut moved = Vec::with_capacity(items.len());
        for mut item in items {
            let Some(target) = item.remote_path().rebase(from, to) else {
                continue;
            };
            if self.abort_active(item.remote_path()) {
                debug!(path = %item.remote_path(), "Transfer restarts after move");
            }
            self.retry.clear(item.remote_path());
            item.relocate(self.local_path(&target)?, target);
            self.store.save_item(&item).await?;
            self.publish_change(&item, ItemChangeKind::Modified);
            moved.push(item);
        }

        let root = self.root.clone();
        self.cache.relocate(from, to, |p| {
            root.resolve(p)
                .map(SyncPath::into_path_buf)
                .unwrap_or_else(|_| root.as_path().to_path_buf())
        });

        let mut tree = self.tree.write().await;
        tree.remove(from);
        for item in moved.iter().filter(|i| i.remote_id().is_some()) {
            if item.is_folder() {
                tree.ensure_folder(item.remote_path());
            } else {
                tree.record_file(item.remote_path(), item.size());
            }
        }
        Ok(())
    }

    /// Record the remote identity of an item that was just moved
    async fn record_moved(&self, to: &RemotePath, descriptor: &RemoteDescriptor) -> Result<(), SyncError> {
        if let Some(mut moved) = self.store.get_item_by_path(to).await? {
            moved.apply_remote(descriptor);
            moved.set_parent_id(self.parent_id(to).await?);
            self.store.save_item(&moved).await?;
        }
        self.tree.write().await.insert_descriptor(descriptor);
        Ok(())
    }

    // ========================================================================
    // Remote changes
    // ========================================================================

    async fn remote_upsert(&self, descriptor: &RemoteDescriptor) -> Result<(), SyncError> {
        let path = &descriptor.path;
        self.tree.write().await.insert_descriptor(descriptor);
        let Some(mut item) = self.store.get_item_by_path(path).await? else {
            return self.track_remote(descriptor).await;
        };
        let previous = item.state();

        if item.kind() != descriptor.kind {
            if previous == SyncState::CloudOnly {
                self.forget(&item).await?;
                return self.track_remote(descriptor).await;
            }
            let record = ConflictRecord::new(*item.id(), ConflictType::Type, item.version_info(), descriptor);
            return self.enter_conflict(item, record, previous).await;
        }

        let same_object = item.remote_id() == Some(&descriptor.id);
        if same_object && (item.is_folder() || descriptor.fingerprint.as_ref() == item.remote_fingerprint()) {
            trace!(path = %path, "Remote change already known");
            return Ok(());
        }

        match previous {
            SyncState::CloudOnly => {
                if item.is_selected() && (item.is_offline() || self.cache.is_pinned(path)) {
                    item.start_download()?;
                }
                item.apply_local_change(descriptor.size, descriptor.modified_at, None);
                item.apply_remote(descriptor);
                self.persist(&item, previous).await?;
                self.publish_change(&item, ItemChangeKind::Modified);
                Ok(())
            }
            SyncState::LocalOnly => self.remote_meets_local(item, descriptor).await,
            SyncState::Synced | SyncState::Error if item.remote_id().is_none() => {
                self.remote_meets_local(item, descriptor).await
            }
            SyncState::Synced | SyncState::Error => match self.detector.detect(&item, descriptor) {
                DetectionResult::InSync => {
                    if previous == SyncState::Error {
                        item.start_upload()?;
                        item.complete_upload(descriptor)?;
                    } else {
                        item.apply_remote(descriptor);
                    }
                    self.persist(&item, previous).await
                }
                DetectionResult::RemoteNewer => {
                    item.start_download_of(descriptor)?;
                    self.persist(&item, previous).await?;
                    self.publish_change(&item, ItemChangeKind::Modified);
                    debug!(path = %path, "Remote change queued for download");
                    Ok(())
                }
                DetectionResult::LocalNewer => {
                    item.start_upload()?;
                    self.persist(&item, previous).await
                }
                DetectionResult::Conflicted(record) => self.enter_conflict(item, *record, previous).await,
            },
            _ => Ok(()),
        }
    }

    /// Start tracking an object that appeared remotely
    async fn track_remote(&self, descriptor: &RemoteDescriptor) -> Result<(), SyncError> {
        let path = descriptor.path.clone();
        let local = self.local_path(&path)?;
        let selected = self.is_selected(&path).await;
        let existing = self.local_snapshot(&local).await?;

        let mut item = SyncItem::from_remote(local, descriptor);
        item.set_parent_id(self.parent_id(&path).await?);
        item.set_selected(selected);
        self.insert_item(&item).await?;
        let previous = item.state();

        let Some((state, fingerprint)) = existing else {
            if selected {
                item.start_download()?;
                self.persist(&item, previous).await?;
                debug!(path = %path, "New remote item queued for download");
            }
            return Ok(());
        };

        // A local copy exists that was never synchronized
        if state.kind != descriptor.kind {
            let local = on_disk_version(&path, &state, fingerprint);
            let record = ConflictRecord::new(*item.id(), ConflictType::Type, local, descriptor);
            return self.enter_conflict(item, record, previous).await;
        }
        if descriptor.is_folder() || (fingerprint.is_some() && fingerprint == descriptor.fingerprint) {
            item.start_download()?;
            item.complete_download(state.size, state.modified_at, fingerprint)?;
            self.persist(&item, previous).await?;
            if !item.is_folder() {
                self.admit(&item);
            }
            info!(path = %path, "Existing local copy adopted");
            return Ok(());
        }
        item.apply_local_change(state.size, state.modified_at, fingerprint);
        let record = ConflictRecord::new(*item.id(), ConflictType::Content, item.version_info(), descriptor);
        self.enter_conflict(item, record, previous).await
    }

    /// A remote object showed up where an unsynchronized local item lives
    async fn remote_meets_local(&self, mut item: SyncItem, descriptor: &RemoteDescriptor) -> Result<(), SyncError> {
        let previous = item.state();
        let identical =
            descriptor.is_folder() || (item.fingerprint().is_some() && item.fingerprint() == descriptor.fingerprint.as_ref());
        if identical {
            item.start_upload()?;
            item.complete_upload(descriptor)?;
            self.persist(&item, previous).await?;
            info!(path = %item.remote_path(), "Local item matched existing remote copy");
            return Ok(());
        }
        let record = ConflictRecord::new(*item.id(), ConflictType::Content, item.version_info(), descriptor);
        self.enter_conflict(item, record, previous).await
    }

    async fn remote_delete(&self, path: &RemotePath) -> Result<(), SyncError> {
        let Some(item) = self.store.get_item_by_path(path).await? else {
            self.tree.write().await.remove(path);
            trace!(path = %path, "Untracked remote path deleted");
            return Ok(());
        };

        if item.is_folder() {
            for child in self.descendants(path).await? {
                let _guard = self.locks.lock(child.remote_path()).await;
                let Some(child) = self.store.get_item_by_path(child.remote_path()).await? else {
                    continue;
                };
                let uploading = child.state() == SyncState::Uploading;
                let Some(mut child) = self.settle(child).await? else {
                    continue;
                };
                if uploading && child.state() == SyncState::LocalOnly {
                    // Never uploaded; it follows its folder back up
                    child.start_upload()?;
                    self.persist(&child, SyncState::LocalOnly).await?;
                    continue;
                }
                self.remote_delete_one(child).await?;
            }
        }
        self.remote_delete_one(item).await?;
        self.tree.write().await.remove(path);
        Ok(())
    }

    async fn remote_delete_one(&self, mut item: SyncItem) -> Result<(), SyncError> {
        let path = item.remote_path().clone();
        let previous = item.state();
        match previous {
            SyncState::CloudOnly => {
                self.forget(&item).await?;
                debug!(path = %path, "Cloud-only item removed");
            }
            SyncState::Synced | SyncState::Error if item.remote_id().is_some() => {
                if item.tombstone().is_some_and(|t| t.local_absent) {
                    item.mark_absent(false, true);
                    self.forget(&item).await?;
                    debug!(path = %path, "Deleted on both sides");
                    return Ok(());
                }

                let retained = if item.is_folder() {
                    self.descendants(&path)
                        .await?
                        .iter()
                        .any(|c| c.state() != SyncState::CloudOnly)
                } else {
                    self.locally_modified(&item).await?
                };
                if retained {
                    // Local data wins over the remote deletion
                    if !item.is_folder() {
                        if let Some((state, fingerprint)) = self.local_snapshot(item.local_path()).await? {
                            item.apply_local_change(state.size, state.modified_at, fingerprint);
                        }
                    }
                    item.detach_remote()?;
                    item.start_upload()?;
                    self.persist(&item, previous).await?;
                    warn!(path = %path, "Deleted remotely but changed locally, uploading again");
                    return Ok(());
                }

                self.filesystem.delete(item.local_path()).await?;
                self.forget(&item).await?;
                info!(path = %path, "Remote deletion applied locally");
            }
            _ => trace!(path = %path, state = %previous, "Nothing remote to delete"),
        }
        Ok(())
    }

    async fn remote_move(&self, from: &RemotePath, descriptor: &RemoteDescriptor) -> Result<(), SyncError> {
        let to = &descriptor.path;
        let Some(item) = self.store.get_item_by_path(from).await? else {
            return self.remote_upsert(descriptor).await;
        };
        if self.store.get_item_by_path(to).await?.is_some() || item.state() == SyncState::LocalOnly {
            if item.state() != SyncState::LocalOnly {
                self.remote_delete(from).await?;
            }
            return self.remote_upsert(descriptor).await;
        }

        let previous = item.state();
        match previous {
            SyncState::CloudOnly => {
                self.relocate_subtree(from, to).await?;
                self.record_moved(to, descriptor).await?;
                debug!(from = %from, to = %to, "Cloud-only item moved");
                Ok(())
            }
            SyncState::Synced if !self.locally_modified(&item).await? => {
                let target = self.local_path(to)?;
                if self.filesystem.exists(item.local_path()).await? {
                    self.filesystem.rename(item.local_path(), &target).await?;
                }
                self.relocate_subtree(from, to).await?;
                self.record_moved(to, descriptor).await?;
                info!(from = %from, to = %to, "Remote move applied locally");
                Ok(())
            }
            SyncState::Synced => match self.detector.detect(&item, descriptor) {
                DetectionResult::Conflicted(record) if record.conflict_type() == ConflictType::Name => {
                    self.enter_conflict(item, *record, previous).await
                }
                _ => {
                    self.remote_delete(from).await?;
                    self.remote_upsert(descriptor).await
                }
            },
            _ => {
                self.remote_delete(from).await?;
                self.remote_upsert(descriptor).await
            }
        }
    }
}
