//! Remote item metadata as reported by the transport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileHash, RemoteId, RemotePath};
use super::sync_item::ItemKind;

/// Metadata of one object in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub id: RemoteId,
    pub path: RemotePath,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Content fingerprint, `None` for folders
    pub fingerprint: Option<FileHash>,
}

impl RemoteDescriptor {
    /// Describe a remote file
    #[must_use]
    pub fn file(
        id: RemoteId,
        path: RemotePath,
        size: u64,
        modified_at: DateTime<Utc>,
        fingerprint: FileHash,
    ) -> Self {
        let name = path.file_name().unwrap_or_default().to_string();
        Self {
            id,
            path,
            name,
            kind: ItemKind::File,
            size,
            modified_at,
            fingerprint: Some(fingerprint),
        }
    }

    /// Describe a remote folder
    #[must_use]
    pub fn folder(id: RemoteId, path: RemotePath, modified_at: DateTime<Utc>) -> Self {
        let name = path.file_name().unwrap_or_default().to_string();
        Self {
            id,
            path,
            name,
            kind: ItemKind::Folder,
            size: 0,
            modified_at,
            fingerprint: None,
        }
    }

    /// Returns true for folders
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}
