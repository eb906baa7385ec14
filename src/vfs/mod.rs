//! Virtual File System (ONFS)
//!
//! A tree of directories and files, addressable by path and persisted as a
//! single JSON record per filesystem.
//!
//! Design:
//! - Nodes live in a slab and are addressed by `NodeId`; identity is the id,
//!   never the name. Duplicate names are allowed, lookup takes the first.
//! - Every node records the id of the filesystem it belongs to. That is a
//!   plain value resolved through the kernel's `FsDirectory`, not a pointer.
//! - Every mutation, structural or content, re-serializes the whole tree to
//!   storage before returning.

pub mod path;
pub mod persist;
pub mod storage;

pub use persist::{StoredFs, StoredNode};
pub use storage::{DirStorage, MemoryStorage, Storage, StorageError, StorageResult};

use log::debug;
use slab::Slab;
use std::collections::BTreeMap;
use std::rc::Rc;

const TARGET: &str = "aurora::vfs";

/// Deepest level a node may sit at, counting the root as level 0.
///
/// Stored records nest two JSON levels per directory and the decoder stops
/// at 128, so anything deeper would persist but never load again.
pub const MAX_DEPTH: usize = 60;

/// Identifier of a filesystem instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsId(pub String);

impl FsId {
    pub fn new(id: impl Into<String>) -> Self {
        FsId(id.into())
    }

    /// Key under which this filesystem is persisted
    pub fn storage_key(&self) -> String {
        format!("onfs:{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a node within its filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// A node handle that is meaningful outside its filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub fs: FsId,
    pub node: NodeId,
}

/// Directory or file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Directory => write!(f, "directory"),
            NodeKind::File => write!(f, "file"),
        }
    }
}

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// File extension (empty for directories)
    pub extension: String,
}

impl DirEntry {
    /// `name.ext` for files with an extension, `name` otherwise
    pub fn display_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }
}

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Filesystem errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// No node with this id
    UnknownNode(NodeId),
    /// Node is not a directory
    NotADirectory(NodeId),
    /// Node is not a file
    NotAFile(NodeId),
    /// Adding the node would make a directory its own ancestor
    WouldCycle { dir: NodeId, node: NodeId },
    /// The root directory cannot be moved, removed, or deleted
    IsRoot,
    /// Node is still attached to the tree
    StillAttached(NodeId),
    /// Persisting the tree failed
    Storage(StorageError),
    /// A stored record could not be decoded
    Corrupt(String),
    /// The node would end up deeper than `MAX_DEPTH`
    TooDeep { depth: usize, max: usize },
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsError::UnknownNode(id) => write!(f, "unknown {}", id),
            FsError::NotADirectory(id) => write!(f, "{} is not a directory", id),
            FsError::NotAFile(id) => write!(f, "{} is not a file", id),
            FsError::WouldCycle { dir, node } => {
                write!(f, "adding {} under {} would create a cycle", node, dir)
            }
            FsError::IsRoot => write!(f, "operation not permitted on the root directory"),
            FsError::StillAttached(id) => write!(f, "{} is still attached", id),
            FsError::Storage(e) => write!(f, "{}", e),
            FsError::Corrupt(msg) => write!(f, "corrupt filesystem record: {}", msg),
            FsError::TooDeep { depth, max } => {
                write!(f, "nesting depth {} exceeds the limit of {}", depth, max)
            }
        }
    }
}

impl std::error::Error for FsError {}

impl From<StorageError> for FsError {
    fn from(e: StorageError) -> Self {
        FsError::Storage(e)
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Directory { children: Vec<NodeId> },
    File { extension: String, content: String },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    /// Owning filesystem, resolved through the kernel's directory
    fs: FsId,
    parent: Option<NodeId>,
    data: NodeData,
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Directory { .. } => NodeKind::Directory,
            NodeData::File { .. } => NodeKind::File,
        }
    }
}

/// A filesystem instance: one root directory plus every node created in it
pub struct Filesystem {
    id: FsId,
    root: NodeId,
    nodes: Slab<Node>,
    storage: Rc<dyn Storage>,
}

impl Filesystem {
    /// Bare filesystem with an empty root, not yet persisted
    pub(crate) fn empty(id: FsId, storage: Rc<dyn Storage>) -> Self {
        let mut nodes = Slab::new();
        let root = NodeId(nodes.insert(Node {
            name: path::ROOT_MARKER.to_string(),
            fs: id.clone(),
            parent: None,
            data: NodeData::Directory {
                children: Vec::new(),
            },
        }));
        Self {
            id,
            root,
            nodes,
            storage,
        }
    }

    /// Create a fresh filesystem with an empty root and persist it
    pub fn init(id: FsId, storage: Rc<dyn Storage>) -> FsResult<Self> {
        let fs = Self::empty(id, storage);
        fs.sync_to_storage()?;
        debug!(target: TARGET, "initialized filesystem {}", fs.id);
        Ok(fs)
    }

    pub fn id(&self) -> &FsId {
        &self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn storage(&self) -> &Rc<dyn Storage> {
        &self.storage
    }

    /// Handle to `node` usable outside this filesystem
    pub fn node_ref(&self, node: NodeId) -> NodeRef {
        NodeRef {
            fs: self.id.clone(),
            node,
        }
    }

    /// Number of live nodes, attached or not
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node.0)
    }

    fn node(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(id.0).ok_or(FsError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(FsError::UnknownNode(id))
    }

    fn children_mut(&mut self, dir: NodeId) -> FsResult<&mut Vec<NodeId>> {
        match &mut self.node_mut(dir)?.data {
            NodeData::Directory { children } => Ok(children),
            NodeData::File { .. } => Err(FsError::NotADirectory(dir)),
        }
    }

    fn file_content_mut(&mut self, file: NodeId) -> FsResult<&mut String> {
        match &mut self.node_mut(file)?.data {
            NodeData::File { content, .. } => Ok(content),
            NodeData::Directory { .. } => Err(FsError::NotAFile(file)),
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|n| n.name.as_str())
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(node.0).map(Node::kind)
    }

    pub fn is_dir(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Directory)
    }

    pub fn is_file(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::File)
    }

    /// Filesystem a node belongs to (its stored back-reference)
    pub fn filesystem_of(&self, node: NodeId) -> Option<&FsId> {
        self.nodes.get(node.0).map(|n| &n.fs)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    pub fn children(&self, dir: NodeId) -> Option<&[NodeId]> {
        match &self.nodes.get(dir.0)?.data {
            NodeData::Directory { children } => Some(children),
            NodeData::File { .. } => None,
        }
    }

    pub fn content(&self, file: NodeId) -> Option<&str> {
        match &self.nodes.get(file.0)?.data {
            NodeData::File { content, .. } => Some(content),
            NodeData::Directory { .. } => None,
        }
    }

    pub fn extension(&self, file: NodeId) -> Option<&str> {
        match &self.nodes.get(file.0)?.data {
            NodeData::File { extension, .. } => Some(extension),
            NodeData::Directory { .. } => None,
        }
    }

    /// List a directory's children in order
    pub fn entries(&self, dir: NodeId) -> Option<Vec<DirEntry>> {
        let children = self.children(dir)?;
        Some(
            children
                .iter()
                .filter_map(|&id| {
                    let node = self.nodes.get(id.0)?;
                    Some(DirEntry {
                        id,
                        name: node.name.clone(),
                        kind: node.kind(),
                        extension: match &node.data {
                            NodeData::File { extension, .. } => extension.clone(),
                            NodeData::Directory { .. } => String::new(),
                        },
                    })
                })
                .collect(),
        )
    }

    /// First child of `dir` named `name`
    pub fn find_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.children(dir)?
            .iter()
            .copied()
            .find(|&id| self.name(id) == Some(name))
    }

    /// True if the node is reachable from the root
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    // ========================================================================
    // Path addressing
    // ========================================================================

    /// Resolve a path to a node.
    ///
    /// Walks child-by-name from the root and gives up at the first segment
    /// that does not exist. `root` and `/` return the root itself.
    pub fn get_item_by_path(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for seg in path::segments(path) {
            current = self.find_child(current, seg)?;
        }
        Some(current)
    }

    /// Resolve `path` relative to the working directory `cwd`
    pub fn resolve(&self, cwd: &str, path: &str) -> Option<NodeId> {
        self.get_item_by_path(&path::resolve(cwd, path))
    }

    /// Full path of a node, found by a depth-first search from the root
    /// comparing identities. Detached nodes have no path.
    pub fn get_path_by_item(&self, node: NodeId) -> Option<String> {
        let mut stack: Vec<(NodeId, Vec<&str>)> = vec![(self.root, Vec::new())];
        while let Some((id, trail)) = stack.pop() {
            if id == node {
                return Some(path::join(&trail));
            }
            if let Some(children) = self.children(id) {
                // Reverse so the first child is searched first
                for &child in children.iter().rev() {
                    let Some(name) = self.name(child) else {
                        continue;
                    };
                    let mut next = trail.clone();
                    next.push(name);
                    stack.push((child, next));
                }
            }
        }
        None
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Create a detached directory
    pub fn create_directory(&mut self, name: impl Into<String>) -> NodeId {
        NodeId(self.nodes.insert(Node {
            name: name.into(),
            fs: self.id.clone(),
            parent: None,
            data: NodeData::Directory {
                children: Vec::new(),
            },
        }))
    }

    /// Create a detached file
    pub fn create_file(
        &mut self,
        name: impl Into<String>,
        extension: impl Into<String>,
        content: impl Into<String>,
    ) -> NodeId {
        NodeId(self.nodes.insert(Node {
            name: name.into(),
            fs: self.id.clone(),
            parent: None,
            data: NodeData::File {
                extension: extension.into(),
                content: content.into(),
            },
        }))
    }

    /// Add `node` to `dir`'s children.
    ///
    /// Returns `Ok(false)` if it is already a child of `dir`. A node attached
    /// to another directory is moved. Persists the tree on change.
    pub fn add_child(&mut self, dir: NodeId, node: NodeId) -> FsResult<bool> {
        if node == self.root {
            return Err(FsError::IsRoot);
        }
        self.node(node)?;
        if self.children(dir).is_none() {
            self.node(dir)?;
            return Err(FsError::NotADirectory(dir));
        }

        let old_parent = self.parent(node);
        if old_parent == Some(dir) {
            return Ok(false);
        }

        // dir must not be node itself or one of its descendants
        let mut ancestor = Some(dir);
        while let Some(id) = ancestor {
            if id == node {
                return Err(FsError::WouldCycle { dir, node });
            }
            ancestor = self.parent(id);
        }

        let depth = self.level(dir) + 1 + self.height(node);
        if depth > MAX_DEPTH {
            return Err(FsError::TooDeep { depth, max: MAX_DEPTH });
        }

        if let Some(old) = old_parent {
            self.children_mut(old)?.retain(|&c| c != node);
        }
        self.children_mut(dir)?.push(node);
        self.node_mut(node)?.parent = Some(dir);

        debug!(target: TARGET, "{}: added {} to {}", self.id, node, dir);
        self.sync_to_storage()?;
        Ok(true)
    }

    /// Remove `node` from `dir`'s children.
    ///
    /// Returns `Ok(false)` if it was not a child. The node stays allocated
    /// (detached) until deleted. Persists the tree on change.
    pub fn remove_child(&mut self, dir: NodeId, node: NodeId) -> FsResult<bool> {
        let children = self.children_mut(dir)?;
        let Some(pos) = children.iter().position(|&c| c == node) else {
            return Ok(false);
        };
        children.remove(pos);
        self.node_mut(node)?.parent = None;

        debug!(target: TARGET, "{}: removed {} from {}", self.id, node, dir);
        self.sync_to_storage()?;
        Ok(true)
    }

    /// Free a detached node and everything below it
    pub fn delete(&mut self, node: NodeId) -> FsResult<()> {
        if node == self.root {
            return Err(FsError::IsRoot);
        }
        if self.node(node)?.parent.is_some() {
            return Err(FsError::StillAttached(node));
        }

        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            let removed = self.nodes.remove(id.0);
            if let NodeData::Directory { children } = removed.data {
                pending.extend(children);
            }
        }
        Ok(())
    }

    /// Number of parent steps from `node` up to the top of its tree
    fn level(&self, node: NodeId) -> usize {
        let mut level = 0;
        let mut current = self.parent(node);
        while let Some(id) = current {
            level += 1;
            current = self.parent(id);
        }
        level
    }

    /// Levels below `node`; 0 for files and empty directories
    fn height(&self, node: NodeId) -> usize {
        let mut height = 0;
        let mut pending = vec![(node, 0)];
        while let Some((id, level)) = pending.pop() {
            height = height.max(level);
            if let Some(children) = self.children(id) {
                pending.extend(children.iter().map(|&c| (c, level + 1)));
            }
        }
        height
    }

    /// Fail before allocating if a new child of `parent` could not be added
    fn check_new_child(&self, parent: NodeId) -> FsResult<()> {
        if self.children(parent).is_none() {
            self.node(parent)?;
            return Err(FsError::NotADirectory(parent));
        }
        let depth = self.level(parent) + 1;
        if depth > MAX_DEPTH {
            return Err(FsError::TooDeep { depth, max: MAX_DEPTH });
        }
        Ok(())
    }

    /// Create a directory under `parent`
    pub fn mkdir(&mut self, parent: NodeId, name: impl Into<String>) -> FsResult<NodeId> {
        self.check_new_child(parent)?;
        let dir = self.create_directory(name);
        self.add_child(parent, dir)?;
        Ok(dir)
    }

    /// Create an empty file under `parent`
    pub fn touch(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        extension: impl Into<String>,
    ) -> FsResult<NodeId> {
        self.check_new_child(parent)?;
        let file = self.create_file(name, extension, "");
        self.add_child(parent, file)?;
        Ok(file)
    }

    // ========================================================================
    // Content mutation
    // ========================================================================

    /// Replace a file's content
    pub fn write_content(&mut self, file: NodeId, text: &str) -> FsResult<()> {
        let content = self.file_content_mut(file)?;
        content.clear();
        content.push_str(text);
        self.sync_to_storage()
    }

    /// Append to a file's content
    pub fn append_content(&mut self, file: NodeId, text: &str) -> FsResult<()> {
        self.file_content_mut(file)?.push_str(text);
        self.sync_to_storage()
    }

    /// Empty a file's content
    pub fn clear_content(&mut self, file: NodeId) -> FsResult<()> {
        self.file_content_mut(file)?.clear();
        self.sync_to_storage()
    }
}

/// The kernel's table of mounted filesystems, by id
#[derive(Default)]
pub struct FsDirectory {
    filesystems: BTreeMap<FsId, Filesystem>,
}

impl FsDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a filesystem, returning any previous one with the same id
    pub fn mount(&mut self, fs: Filesystem) -> Option<Filesystem> {
        self.filesystems.insert(fs.id().clone(), fs)
    }

    pub fn unmount(&mut self, id: &FsId) -> Option<Filesystem> {
        self.filesystems.remove(id)
    }

    pub fn get(&self, id: &FsId) -> Option<&Filesystem> {
        self.filesystems.get(id)
    }

    pub fn get_mut(&mut self, id: &FsId) -> Option<&mut Filesystem> {
        self.filesystems.get_mut(id)
    }

    /// Filesystem owning a node handle
    pub fn owner_of(&self, node: &NodeRef) -> Option<&Filesystem> {
        self.get(&node.fs).filter(|fs| fs.contains(node.node))
    }

    pub fn ids(&self) -> Vec<FsId> {
        self.filesystems.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.filesystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filesystems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> (Filesystem, MemoryStorage) {
        let storage = MemoryStorage::new();
        let fs = Filesystem::init(FsId::new("test"), Rc::new(storage.clone())).unwrap();
        (fs, storage)
    }

    #[test]
    fn test_init_persists_empty_root() {
        let (fs, storage) = new_fs();
        assert_eq!(fs.name(fs.root()), Some("root"));
        assert!(storage.load("onfs:test").unwrap().is_some());
    }

    #[test]
    fn test_root_lookup_forms() {
        let (fs, _) = new_fs();
        assert_eq!(fs.get_item_by_path("root"), Some(fs.root()));
        assert_eq!(fs.get_item_by_path("/"), Some(fs.root()));
    }

    #[test]
    fn test_lookup_by_name() {
        let (mut fs, _) = new_fs();
        let home = fs.mkdir(fs.root(), "home").unwrap();
        let welcome = fs.touch(home, "welcome", "txt").unwrap();

        assert_eq!(fs.get_item_by_path("root/home/welcome"), Some(welcome));
        assert_eq!(fs.get_item_by_path("/home/welcome"), Some(welcome));
        assert_eq!(fs.get_item_by_path("/root/home"), Some(home));
        assert_eq!(fs.get_item_by_path("root/home/missing"), None);
        assert_eq!(fs.get_item_by_path("root/home/welcome/deeper"), None);
    }

    #[test]
    fn test_duplicate_names_resolve_to_first() {
        let (mut fs, _) = new_fs();
        let first = fs.touch(fs.root(), "dup", "a").unwrap();
        let second = fs.touch(fs.root(), "dup", "b").unwrap();
        assert_ne!(first, second);
        assert_eq!(fs.get_item_by_path("root/dup"), Some(first));
        assert_eq!(fs.children(fs.root()).unwrap().len(), 2);
    }

    #[test]
    fn test_path_roundtrip() {
        let (mut fs, _) = new_fs();
        let a = fs.mkdir(fs.root(), "a").unwrap();
        let b = fs.mkdir(a, "b").unwrap();
        let c = fs.touch(b, "c", "md").unwrap();

        for node in [fs.root(), a, b, c] {
            let path = fs.get_path_by_item(node).unwrap();
            assert_eq!(fs.get_item_by_path(&path), Some(node));
        }
        assert_eq!(fs.get_path_by_item(c).unwrap(), "root/a/b/c");
    }

    #[test]
    fn test_detached_nodes_have_no_path() {
        let (mut fs, _) = new_fs();
        let loose = fs.create_file("loose", "txt", "");
        assert_eq!(fs.get_path_by_item(loose), None);
        assert!(!fs.is_attached(loose));
    }

    #[test]
    fn test_add_child_is_idempotent() {
        let (mut fs, _) = new_fs();
        let f = fs.create_file("f", "", "");
        assert!(fs.add_child(fs.root(), f).unwrap());
        assert!(!fs.add_child(fs.root(), f).unwrap());
        assert_eq!(fs.children(fs.root()).unwrap(), &[f]);
    }

    #[test]
    fn test_add_child_moves_between_directories() {
        let (mut fs, _) = new_fs();
        let a = fs.mkdir(fs.root(), "a").unwrap();
        let b = fs.mkdir(fs.root(), "b").unwrap();
        let f = fs.touch(a, "f", "").unwrap();

        assert!(fs.add_child(b, f).unwrap());
        assert!(fs.children(a).unwrap().is_empty());
        assert_eq!(fs.parent(f), Some(b));
        assert_eq!(fs.get_path_by_item(f).unwrap(), "root/b/f");
    }

    #[test]
    fn test_add_child_rejects_cycles_and_files() {
        let (mut fs, _) = new_fs();
        let a = fs.mkdir(fs.root(), "a").unwrap();
        let b = fs.mkdir(a, "b").unwrap();
        let f = fs.touch(a, "f", "").unwrap();

        assert_eq!(fs.add_child(b, a), Err(FsError::WouldCycle { dir: b, node: a }));
        assert_eq!(fs.add_child(a, a), Err(FsError::WouldCycle { dir: a, node: a }));
        assert_eq!(fs.add_child(f, b), Err(FsError::NotADirectory(f)));
        assert_eq!(fs.add_child(a, fs.root()), Err(FsError::IsRoot));
        assert_eq!(fs.add_child(a, NodeId(999)), Err(FsError::UnknownNode(NodeId(999))));
    }

    #[test]
    fn test_add_child_rejects_subtrees_past_max_depth() {
        let (mut fs, _) = new_fs();
        let mut dir = fs.root();
        for i in 0..MAX_DEPTH - 1 {
            dir = fs.mkdir(dir, format!("d{}", i)).unwrap();
        }
        // a detached pair of directories is two levels tall
        let top = fs.create_directory("top");
        let below = fs.create_directory("below");
        fs.add_child(top, below).unwrap();

        assert_eq!(
            fs.add_child(dir, top),
            Err(FsError::TooDeep { depth: MAX_DEPTH + 1, max: MAX_DEPTH })
        );
        assert_eq!(fs.parent(top), None);
        assert_eq!(fs.add_child(dir, below), Ok(true));
        assert_eq!(fs.level(below), MAX_DEPTH);
    }

    #[test]
    fn test_remove_child_keeps_siblings() {
        let (mut fs, _) = new_fs();
        let a = fs.touch(fs.root(), "a", "").unwrap();
        let b = fs.touch(fs.root(), "b", "").unwrap();
        let path = fs.get_path_by_item(a).unwrap();

        assert!(fs.remove_child(fs.root(), a).unwrap());
        assert_eq!(fs.get_item_by_path(&path), None);
        assert_eq!(fs.get_item_by_path("root/b"), Some(b));
        assert!(!fs.remove_child(fs.root(), a).unwrap());
        assert!(fs.contains(a));
    }

    #[test]
    fn test_delete_frees_detached_subtree() {
        let (mut fs, _) = new_fs();
        let a = fs.mkdir(fs.root(), "a").unwrap();
        fs.touch(a, "x", "").unwrap();
        assert_eq!(fs.delete(a), Err(FsError::StillAttached(a)));

        fs.remove_child(fs.root(), a).unwrap();
        let before = fs.node_count();
        fs.delete(a).unwrap();
        assert_eq!(fs.node_count(), before - 2);
        assert_eq!(fs.delete(fs.root()), Err(FsError::IsRoot));
    }

    #[test]
    fn test_content_edits() {
        let (mut fs, _) = new_fs();
        let f = fs.touch(fs.root(), "notes", "txt").unwrap();
        fs.write_content(f, "hello").unwrap();
        fs.append_content(f, " world").unwrap();
        assert_eq!(fs.content(f), Some("hello world"));
        fs.clear_content(f).unwrap();
        assert_eq!(fs.content(f), Some(""));
        assert_eq!(fs.write_content(fs.root(), "x"), Err(FsError::NotAFile(fs.root())));
    }

    #[test]
    fn test_content_edits_are_persisted() {
        let (mut fs, storage) = new_fs();
        let f = fs.touch(fs.root(), "notes", "txt").unwrap();
        fs.write_content(f, "durable").unwrap();
        let record = storage.load("onfs:test").unwrap().unwrap();
        assert!(record.contains("durable"));
    }

    #[test]
    fn test_nodes_know_their_filesystem() {
        let (mut fs, _) = new_fs();
        let f = fs.create_file("f", "", "");
        assert_eq!(fs.filesystem_of(f), Some(&FsId::new("test")));
        assert_eq!(fs.node_ref(f).fs, FsId::new("test"));
    }

    #[test]
    fn test_entries_and_display_names() {
        let (mut fs, _) = new_fs();
        fs.mkdir(fs.root(), "bin").unwrap();
        fs.touch(fs.root(), "readme", "md").unwrap();
        let names: Vec<_> = fs
            .entries(fs.root())
            .unwrap()
            .iter()
            .map(DirEntry::display_name)
            .collect();
        assert_eq!(names, vec!["bin", "readme.md"]);
    }

    #[test]
    fn test_fs_directory() {
        let (fs, _) = new_fs();
        let root = fs.node_ref(fs.root());
        let mut dir = FsDirectory::new();
        assert!(dir.mount(fs).is_none());
        assert_eq!(dir.ids(), vec![FsId::new("test")]);
        assert!(dir.owner_of(&root).is_some());
        assert!(dir
            .owner_of(&NodeRef {
                fs: FsId::new("other"),
                node: root.node
            })
            .is_none());
    }
}
