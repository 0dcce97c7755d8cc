//! Folder nodes of the selective-sync tree
//!
//! Nodes live in an arena and refer to each other through [`NodeId`]
//! indices, so the whole tree can be dropped and rebuilt from a fresh
//! remote listing without untangling owning pointers.

use serde::{Deserialize, Serialize};

use super::newtypes::RemotePath;

/// Index of a node inside its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// One folder of the remote hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub path: RemotePath,
    pub name: String,
    pub selected: bool,
    /// Bytes of the files held directly in this folder
    pub own_size: u64,
    /// `own_size` plus the aggregate size of every child
    pub aggregate_size: u64,
    pub parent: Option<NodeId>,
    /// Children ordered by name
    pub children: Vec<NodeId>,
}

impl FolderNode {
    /// Create a childless node
    #[must_use]
    pub fn new(path: RemotePath, parent: Option<NodeId>, selected: bool) -> Self {
        let name = path.file_name().unwrap_or_default().to_string();
        Self {
            path,
            name,
            selected,
            own_size: 0,
            aggregate_size: 0,
            parent,
            children: Vec::new(),
        }
    }
}
