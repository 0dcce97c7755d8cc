//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for identifiers, paths and
//! fingerprints. Each newtype ensures data validity at construction time, so
//! the rest of the engine never has to re-check a path or a hash.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID value
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    DomainError::InvalidId(format!("Invalid {}: {e}", stringify!($name)))
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Stable identifier of a synchronized item
    UniqueId
);

uuid_id!(
    /// Identifier of a conflict record
    ConflictId
);

uuid_id!(
    /// Identifier of a queued retryable operation
    OperationId
);

uuid_id!(
    /// Identifier of a single in-flight transfer
    TransferId
);

// ============================================================================
// Path types
// ============================================================================

/// A validated, normalized absolute local path
///
/// SyncPath ensures the path is:
/// - Absolute
/// - Free of `.` and `..` components after normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SyncPath(PathBuf);

impl SyncPath {
    /// Create a new SyncPath, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is relative or climbs
    /// above the filesystem root
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(format!(
                            "Path escapes the filesystem root: {}",
                            path.display()
                        )));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(Self(normalized))
    }

    /// Borrow the inner path
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert to an owned PathBuf
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Map a remote path onto this directory, treating `self` as the sync root
    ///
    /// # Errors
    /// Returns an error if the resulting path fails validation
    pub fn resolve(&self, remote: &RemotePath) -> Result<Self, DomainError> {
        let relative = remote.as_str().trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.clone());
        }
        Self::new(self.0.join(relative))
    }

    /// Express this path as a remote path relative to `root`
    ///
    /// # Errors
    /// Returns `DomainError::PathNotInSyncRoot` if this path is outside `root`
    pub fn to_remote(&self, root: &SyncPath) -> Result<RemotePath, DomainError> {
        let relative = self.0.strip_prefix(&root.0).map_err(|_| {
            DomainError::PathNotInSyncRoot(format!(
                "{} is not within {}",
                self.0.display(),
                root.0.display()
            ))
        })?;

        let mut remote = RemotePath::root();
        for component in relative.components() {
            let name = component.as_os_str().to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("Non UTF-8 path: {}", self.0.display()))
            })?;
            remote = remote.join(name)?;
        }
        Ok(remote)
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for SyncPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<SyncPath> for PathBuf {
    fn from(path: SyncPath) -> Self {
        path.0
    }
}

impl AsRef<Path> for SyncPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// A path in the remote store, always `/`-rooted and relative to the sync root
///
/// This is the logical key of an item: the change feed, the per-item locks
/// and state queries all address items by their remote path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// A single trailing slash is stripped, so `/Docs/` and `/Docs` are equal.
    ///
    /// # Errors
    /// Returns an error if the path is not `/`-rooted, has empty segments or
    /// contains `.`/`..` segments
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with '/': {path}"
            )));
        }

        let trimmed = if path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path.as_str())
        } else {
            path.as_str()
        };

        if trimmed.len() > 1 {
            for segment in trimmed[1..].split('/') {
                if segment.is_empty() || segment == "." || segment == ".." {
                    return Err(DomainError::InvalidRemotePath(format!(
                        "Remote path has an invalid segment: {path}"
                    )));
                }
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The root path "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Whether this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append one path component
    ///
    /// # Errors
    /// Returns an error if the component is empty, contains `/` or is a
    /// relative marker
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component == "." || component == ".."
        {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid path component: {component}"
            )));
        }

        if self.is_root() {
            Ok(Self(format!("/{component}")))
        } else {
            Ok(Self(format!("{}/{component}", self.0)))
        }
    }

    /// The parent path, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// The last component, `None` for the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Number of components below the root
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// True if `self` equals `prefix` or lies below it
    #[must_use]
    pub fn starts_with(&self, prefix: &RemotePath) -> bool {
        if prefix.is_root() || self == prefix {
            return true;
        }
        self.0
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// True if `self` lies strictly below `ancestor`
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &RemotePath) -> bool {
        self != ancestor && self.starts_with(ancestor)
    }

    /// Replace the `from` prefix of this path with `to`
    ///
    /// Returns `None` when `self` is not under `from`.
    #[must_use]
    pub fn rebase(&self, from: &RemotePath, to: &RemotePath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }
        if self == from {
            return Some(to.clone());
        }
        let rest = if from.is_root() {
            &self.0[1..]
        } else {
            &self.0[from.0.len() + 1..]
        };
        let mut rebased = to.clone();
        for segment in rest.split('/') {
            rebased = rebased.join(segment).ok()?;
        }
        Some(rebased)
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

// ============================================================================
// Remote store identifiers
// ============================================================================

/// Identifier assigned by the remote store to an uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns an error if the ID is empty or contains characters outside
    /// alphanumerics and `! - _ .`
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '!' | '-' | '_' | '.'))
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// Content fingerprint
///
/// Any non-empty ASCII alphanumeric string is accepted so that remote stores
/// with their own hash formats can be represented. Fingerprints computed
/// locally are lowercase SHA-256 hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Create a new FileHash
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the value is empty or not
    /// alphanumeric
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash(
                "Fingerprint cannot be empty".to_string(),
            ));
        }

        if !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidHash(format!(
                "Fingerprint must be alphanumeric: {hash}"
            )));
        }

        Ok(Self(hash))
    }

    /// Build a fingerprint from a raw digest, encoded as lowercase hex
    #[must_use]
    pub fn from_digest(digest: &[u8]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

/// Opaque position in the remote change stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Create a new ChangeCursor
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCursor` if the cursor is empty
    pub fn new(cursor: String) -> Result<Self, DomainError> {
        if cursor.trim().is_empty() {
            return Err(DomainError::InvalidCursor(
                "Change cursor cannot be empty".to_string(),
            ));
        }
        Ok(Self(cursor))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChangeCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChangeCursor {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChangeCursor> for String {
    fn from(cursor: ChangeCursor) -> Self {
        cursor.0
    }
}
