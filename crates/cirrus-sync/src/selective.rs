//! Selective-sync folder tree
//!
//! Holds the remote folder hierarchy with a selection flag per folder and
//! the sizes needed to estimate what a selection change will transfer.
//!
//! ## Design Notes
//!
//! - Nodes live in a `Vec` arena and point at each other through
//!   [`NodeId`]; a path index maps logical paths to nodes. Removing a
//!   folder compacts the arena, so ids are only stable between removals.
//! - Selecting or deselecting a folder sets the flag on the folder and
//!   every descendant. Ancestors and siblings keep their own flags, so a
//!   selected folder may sit under a deselected one.
//! - A path that is not a known folder takes the flag of its nearest known
//!   ancestor folder, unless it is a known file with a flag of its own.
//!   Files never become folder nodes.
//! - Only flags that differ from the parent are persisted
//!   ([`FolderTree::explicit_selection`]); replaying them by depth through
//!   [`FolderTree::apply_selection`] restores the same tree state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use cirrus_core::domain::{FolderNode, NodeId, RemoteDescriptor, RemotePath};

const ROOT: NodeId = NodeId(0);

/// Outcome of a [`FolderTree::select`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub path: RemotePath,
    pub selected: bool,
    /// Folders whose flag actually changed, shallowest first; for a file,
    /// the file itself when its flag changed
    pub changed: Vec<RemotePath>,
    /// Total size of the files under the folder, or the file's size
    pub affected_bytes: u64,
}

/// Arena-backed remote folder hierarchy
#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    index: HashMap<RemotePath, NodeId>,
    files: BTreeMap<RemotePath, u64>,
    /// Files whose flag differs from their folder's
    file_flags: BTreeMap<RemotePath, bool>,
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderTree {
    /// A tree holding only the selected root
    pub fn new() -> Self {
        let root = RemotePath::root();
        let mut index = HashMap::new();
        index.insert(root.clone(), ROOT);
        Self {
            nodes: vec![FolderNode::new(root, None, true)],
            index,
            files: BTreeMap::new(),
            file_flags: BTreeMap::new(),
        }
    }

    /// Build a fresh tree from a remote listing
    pub fn from_listing<'a>(listing: impl IntoIterator<Item = &'a RemoteDescriptor>) -> Self {
        let mut tree = Self::new();
        for descriptor in listing {
            tree.insert_descriptor(descriptor);
        }
        tree
    }

    /// Record a listed folder or file
    pub fn insert_descriptor(&mut self, descriptor: &RemoteDescriptor) {
        if descriptor.is_folder() {
            self.ensure_folder(&descriptor.path);
        } else {
            self.record_file(&descriptor.path, descriptor.size);
        }
    }

    // --- lookup ---

    pub fn node(&self, path: &RemotePath) -> Option<&FolderNode> {
        self.index.get(path).map(|id| &self.nodes[id.0])
    }

    pub fn get(&self, id: NodeId) -> Option<&FolderNode> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn contains_folder(&self, path: &RemotePath) -> bool {
        self.index.contains_key(path)
    }

    #[must_use]
    pub fn file_size(&self, path: &RemotePath) -> Option<u64> {
        self.files.get(path).copied()
    }

    /// Direct child folders of `path`, ordered by name
    pub fn children(&self, path: &RemotePath) -> Vec<&FolderNode> {
        self.node(path)
            .map(|n| n.children.iter().map(|c| &self.nodes[c.0]).collect())
            .unwrap_or_default()
    }

    /// Number of folders, root included
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.files.is_empty()
    }

    fn nearest_folder(&self, path: &RemotePath) -> NodeId {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if let Some(id) = self.index.get(&p) {
                return *id;
            }
            current = p.parent();
        }
        ROOT
    }

    // --- mutation ---

    /// Return the node for `path`, creating it and any missing ancestors
    ///
    /// New folders inherit the selection flag of their parent.
    pub fn ensure_folder(&mut self, path: &RemotePath) -> NodeId {
        if let Some(id) = self.index.get(path) {
            return *id;
        }
        let parent_path = path.parent().unwrap_or_else(RemotePath::root);
        let parent = self.ensure_folder(&parent_path);
        let selected = self.nodes[parent.0].selected;

        let id = NodeId(self.nodes.len());
        let node = FolderNode::new(path.clone(), Some(parent), selected);
        let position = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| self.nodes[c.0].name > node.name)
            .unwrap_or(self.nodes[parent.0].children.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.insert(position, id);
        self.index.insert(path.clone(), id);
        id
    }

    /// Record (or update) the size of a file
    pub fn record_file(&mut self, path: &RemotePath, size: u64) {
        let parent_path = path.parent().unwrap_or_else(RemotePath::root);
        let parent = self.ensure_folder(&parent_path);
        let previous = self.files.insert(path.clone(), size).unwrap_or(0);
        self.adjust_sizes(parent, size, previous);
    }

    fn adjust_sizes(&mut self, folder: NodeId, add: u64, sub: u64) {
        let node = &mut self.nodes[folder.0];
        node.own_size = node.own_size.saturating_add(add).saturating_sub(sub);
        let mut current = Some(folder);
        while let Some(id) = current {
            let node = &mut self.nodes[id.0];
            node.aggregate_size = node.aggregate_size.saturating_add(add).saturating_sub(sub);
            current = node.parent;
        }
    }

    /// Forget a file, or a folder with everything under it
    pub fn remove(&mut self, path: &RemotePath) {
        if let Some(size) = self.files.remove(path) {
            self.file_flags.remove(path);
            let parent = self.nearest_folder(&path.parent().unwrap_or_else(RemotePath::root));
            self.adjust_sizes(parent, 0, size);
            return;
        }
        if path.is_root() || !self.index.contains_key(path) {
            return;
        }

        let mut folders: Vec<(RemotePath, bool)> = self
            .nodes
            .iter()
            .filter(|n| !n.path.starts_with(path))
            .map(|n| (n.path.clone(), n.selected))
            .collect();
        folders.sort_by_key(|(p, _)| p.depth());
        let files: Vec<(RemotePath, u64)> = self
            .files
            .iter()
            .filter(|(p, _)| !p.starts_with(path))
            .map(|(p, s)| (p.clone(), *s))
            .collect();

        let mut rebuilt = Self::new();
        for (folder, selected) in folders {
            let id = rebuilt.ensure_folder(&folder);
            rebuilt.nodes[id.0].selected = selected;
        }
        for (file, size) in files {
            rebuilt.record_file(&file, size);
        }
        rebuilt.file_flags = std::mem::take(&mut self.file_flags);
        rebuilt.file_flags.retain(|p, _| !p.starts_with(path));
        debug!(path = %path, folders = rebuilt.len(), "Folder removed from tree");
        *self = rebuilt;
    }

    // --- selection ---

    /// Set the flag of `path` and every descendant folder
    ///
    /// A known file only gets a flag of its own.
    pub fn select(&mut self, path: &RemotePath, selected: bool) -> SelectionChange {
        if let Some(size) = self.file_size(path).filter(|_| !self.index.contains_key(path)) {
            return self.select_file(path, size, selected);
        }

        let start = self.ensure_folder(path);
        let mut changed = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.0];
            if node.selected != selected {
                node.selected = selected;
                changed.push(node.path.clone());
            }
            stack.extend(node.children.iter().rev().copied());
        }
        changed.sort_by_key(|p| p.depth());
        self.file_flags.retain(|p, _| !p.starts_with(path));

        SelectionChange {
            path: path.clone(),
            selected,
            changed,
            affected_bytes: self.nodes[start.0].aggregate_size,
        }
    }

    fn select_file(&mut self, path: &RemotePath, size: u64, selected: bool) -> SelectionChange {
        let was = self.is_selected(path);
        let parent = path.parent().unwrap_or_else(RemotePath::root);
        if self.nodes[self.nearest_folder(&parent).0].selected == selected {
            self.file_flags.remove(path);
        } else {
            self.file_flags.insert(path.clone(), selected);
        }

        SelectionChange {
            path: path.clone(),
            selected,
            changed: if was == selected { Vec::new() } else { vec![path.clone()] },
            affected_bytes: size,
        }
    }

    /// Whether `path` (folder or file) is synchronized locally
    #[must_use]
    pub fn is_selected(&self, path: &RemotePath) -> bool {
        if let Some(id) = self.index.get(path) {
            return self.nodes[id.0].selected;
        }
        if let Some(flag) = self.file_flags.get(path) {
            return *flag;
        }
        let parent = path.parent().unwrap_or_else(RemotePath::root);
        self.nodes[self.nearest_folder(&parent).0].selected
    }

    /// Every selected folder
    pub fn selected_paths(&self) -> BTreeSet<RemotePath> {
        self.nodes
            .iter()
            .filter(|n| n.selected)
            .map(|n| n.path.clone())
            .collect()
    }

    /// Bytes under `paths`, counting nested paths once
    pub fn estimated_size(&self, paths: &[RemotePath]) -> u64 {
        let mut sorted: Vec<&RemotePath> = paths.iter().collect();
        sorted.sort_by_key(|p| p.depth());

        let mut counted: Vec<&RemotePath> = Vec::new();
        let mut total = 0u64;
        for path in sorted {
            if counted.iter().any(|c| path.starts_with(c)) {
                continue;
            }
            let size = match self.index.get(path) {
                Some(id) => self.nodes[id.0].aggregate_size,
                None => self.files.get(path).copied().unwrap_or(0),
            };
            total = total.saturating_add(size);
            counted.push(path);
        }
        total
    }

    /// Flags that differ from the parent's, the root's included when off
    pub fn explicit_selection(&self) -> BTreeMap<RemotePath, bool> {
        let mut explicit: BTreeMap<RemotePath, bool> = self
            .nodes
            .iter()
            .filter(|n| match n.parent {
                Some(parent) => self.nodes[parent.0].selected != n.selected,
                None => !n.selected,
            })
            .map(|n| (n.path.clone(), n.selected))
            .collect();
        explicit.extend(self.file_flags.iter().map(|(p, f)| (p.clone(), *f)));
        explicit
    }

    /// Replay persisted flags, shallowest first
    pub fn apply_selection(&mut self, selection: &BTreeMap<RemotePath, bool>) {
        let mut ordered: Vec<(&RemotePath, &bool)> = selection.iter().collect();
        ordered.sort_by_key(|(p, _)| p.depth());
        for (path, selected) in ordered {
            self.select(path, *selected);
        }
    }
}
