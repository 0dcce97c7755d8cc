//! Directory snapshots and their differences
//!
//! Both change feeds of the daemon work by polling: the local poller walks
//! the sync root and the directory transport walks the remote directory.
//! Each walk yields a [`Snapshot`]; [`diff`] turns two consecutive snapshots
//! into the changes between them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use cirrus_core::domain::{ChangeKind, ItemKind, RemotePath};

/// Suffix of files that are still being written
pub const PARTIAL_SUFFIX: &str = ".cirrus-part";

/// What a walk saw at one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: ItemKind,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

pub type Snapshot = BTreeMap<RemotePath, Entry>;

pub fn to_utc(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    time.ok()
        .and_then(|st| st.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Absolute location of `remote` below `root`
pub fn object_path(root: &Path, remote: &RemotePath) -> PathBuf {
    root.join(remote.as_str().trim_start_matches('/'))
}

/// Every file and directory below `root`, keyed by logical path
///
/// Partial files and names that are not valid path components are skipped.
/// A missing root is an empty snapshot.
pub async fn walk(root: &Path) -> std::io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut pending = vec![(root.to_path_buf(), RemotePath::root())];

    while let Some((dir, logical)) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "Skipping name that is not UTF-8");
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            let Ok(path) = logical.join(&name) else {
                warn!(name = %name, "Skipping invalid path component");
                continue;
            };
            // Vanished between listing and stat
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };

            if metadata.is_dir() {
                pending.push((entry.path(), path.clone()));
                snapshot.insert(
                    path,
                    Entry {
                        kind: ItemKind::Folder,
                        size: 0,
                        modified_at: to_utc(metadata.modified()),
                    },
                );
            } else if metadata.is_file() {
                snapshot.insert(
                    path,
                    Entry {
                        kind: ItemKind::File,
                        size: metadata.len(),
                        modified_at: to_utc(metadata.modified()),
                    },
                );
            }
        }
    }

    debug!(root = %root.display(), entries = snapshot.len(), "Walked directory");
    Ok(snapshot)
}

/// Changes that turn `old` into `new`
///
/// Creations and modifications come parents first. Only the topmost path of
/// a deleted subtree is reported. A path whose kind changed is reported as
/// modified; the engine sorts out the type change.
pub fn diff<T: PartialEq>(
    old: &BTreeMap<RemotePath, T>,
    new: &BTreeMap<RemotePath, T>,
) -> Vec<(ChangeKind, RemotePath)> {
    let mut changes: Vec<(ChangeKind, RemotePath)> = new
        .iter()
        .filter_map(|(path, entry)| match old.get(path) {
            None => Some((ChangeKind::Created, path.clone())),
            Some(previous) if previous != entry => Some((ChangeKind::Modified, path.clone())),
            Some(_) => None,
        })
        .collect();
    changes.sort_by_key(|(_, path)| path.depth());

    let gone: Vec<&RemotePath> = old.keys().filter(|p| !new.contains_key(*p)).collect();
    for path in &gone {
        let covered = path
            .parent()
            .is_some_and(|parent| gone.iter().any(|g| **g == parent));
        if !covered {
            changes.push((ChangeKind::Deleted, (*path).clone()));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> RemotePath {
        RemotePath::new(p.to_string()).unwrap()
    }

    fn file(size: u64) -> Entry {
        Entry {
            kind: ItemKind::File,
            size,
            modified_at: DateTime::UNIX_EPOCH,
        }
    }

    fn folder() -> Entry {
        Entry {
            kind: ItemKind::Folder,
            size: 0,
            modified_at: DateTime::UNIX_EPOCH,
        }
    }

    mod diff_tests {
        use super::*;

        #[test]
        fn test_created_parents_first() {
            let old = Snapshot::new();
            let new = Snapshot::from([
                (path("/a/b/c.txt"), file(1)),
                (path("/a"), folder()),
                (path("/a/b"), folder()),
            ]);

            let paths: Vec<String> = diff(&old, &new)
                .into_iter()
                .map(|(kind, p)| {
                    assert_eq!(kind, ChangeKind::Created);
                    p.to_string()
                })
                .collect();
            assert_eq!(paths, ["/a", "/a/b", "/a/b/c.txt"]);
        }

        #[test]
        fn test_modified_and_unchanged() {
            let old = Snapshot::from([(path("/x"), file(1)), (path("/y"), file(2))]);
            let new = Snapshot::from([(path("/x"), file(5)), (path("/y"), file(2))]);

            assert_eq!(diff(&old, &new), vec![(ChangeKind::Modified, path("/x"))]);
        }

        #[test]
        fn test_deleted_subtree_reports_only_its_root() {
            let old = Snapshot::from([
                (path("/d"), folder()),
                (path("/d/e"), folder()),
                (path("/d/e/f.txt"), file(1)),
                (path("/g.txt"), file(1)),
            ]);
            let new = Snapshot::from([(path("/g.txt"), file(1))]);

            assert_eq!(diff(&old, &new), vec![(ChangeKind::Deleted, path("/d"))]);
        }
    }

    mod walk_tests {
        use super::*;

        #[tokio::test]
        async fn test_walk_skips_partial_files() {
            let dir = tempfile::TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("docs")).unwrap();
            std::fs::write(dir.path().join("docs/a.txt"), b"abc").unwrap();
            std::fs::write(dir.path().join(format!("b.txt{PARTIAL_SUFFIX}")), b"half").unwrap();

            let snapshot = walk(dir.path()).await.unwrap();

            assert_eq!(snapshot.len(), 2);
            assert_eq!(snapshot[&path("/docs")].kind, ItemKind::Folder);
            assert_eq!(snapshot[&path("/docs/a.txt")].size, 3);
        }

        #[tokio::test]
        async fn test_missing_root_is_empty() {
            let dir = tempfile::TempDir::new().unwrap();
            let snapshot = walk(&dir.path().join("absent")).await.unwrap();
            assert!(snapshot.is_empty());
        }
    }
}
