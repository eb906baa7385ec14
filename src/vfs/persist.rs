//! ONFS persistence
//!
//! The whole tree is saved as one JSON record under `onfs:<fs-id>`:
//!
//! ```json
//! {"root": {"type": "directory", "name": "root", "children": [
//!     {"type": "file", "name": "welcome", "extension": "txt", "content": "hi"}
//! ]}}
//! ```
//!
//! Only structure is stored: type tag, names, extensions, content, child
//! order. Loading rebuilds live nodes from that plain graph.

use super::{FsError, FsId, FsResult, Filesystem, Node, NodeData, NodeId, Storage};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

const TARGET: &str = "aurora::vfs";

/// Plain, behavior-free form of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoredNode {
    Directory {
        name: String,
        #[serde(default)]
        children: Vec<StoredNode>,
    },
    File {
        name: String,
        #[serde(default)]
        extension: String,
        #[serde(default)]
        content: String,
    },
}

impl StoredNode {
    pub fn name(&self) -> &str {
        match self {
            StoredNode::Directory { name, .. } | StoredNode::File { name, .. } => name,
        }
    }
}

/// A persisted filesystem record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFs {
    pub root: StoredNode,
}

impl StoredFs {
    pub fn from_json(json: &str) -> FsResult<Self> {
        serde_json::from_str(json).map_err(|e| FsError::Corrupt(e.to_string()))
    }

    pub fn to_json(&self) -> FsResult<String> {
        serde_json::to_string(self).map_err(|e| FsError::Corrupt(e.to_string()))
    }
}

impl Filesystem {
    /// Plain graph of everything reachable from the root
    pub fn snapshot(&self) -> StoredFs {
        StoredFs {
            root: self.stored_node(self.root),
        }
    }

    fn stored_node(&self, id: NodeId) -> StoredNode {
        let node = &self.nodes[id.0];
        match &node.data {
            NodeData::Directory { children } => StoredNode::Directory {
                name: node.name.clone(),
                children: children.iter().map(|&c| self.stored_node(c)).collect(),
            },
            NodeData::File { extension, content } => StoredNode::File {
                name: node.name.clone(),
                extension: extension.clone(),
                content: content.clone(),
            },
        }
    }

    /// Serialize the tree to its JSON record
    pub fn to_json(&self) -> FsResult<String> {
        self.snapshot().to_json()
    }

    /// Write the whole tree to storage
    pub fn sync_to_storage(&self) -> FsResult<()> {
        let json = self.to_json()?;
        self.storage.store(&self.id.storage_key(), &json)?;
        debug!(target: TARGET, "{}: synced {} bytes", self.id, json.len());
        Ok(())
    }

    /// Rebuild a live filesystem from a stored graph.
    ///
    /// The root must be a directory. Child order, names, extensions, and
    /// content come back exactly as saved. Nothing is written to storage.
    pub fn reconstruct(stored: StoredFs, id: FsId, storage: Rc<dyn Storage>) -> FsResult<Self> {
        let StoredNode::Directory { children, .. } = stored.root else {
            return Err(FsError::Corrupt("root is not a directory".into()));
        };

        let mut fs = Filesystem::empty(id, storage);
        let root = fs.root;

        // Top-down, one directory level at a time
        let mut pending: Vec<(NodeId, Vec<StoredNode>)> = vec![(root, children)];
        while let Some((dir, stored_children)) = pending.pop() {
            for child in stored_children {
                match child {
                    StoredNode::Directory { name, children } => {
                        let data = NodeData::Directory {
                            children: Vec::new(),
                        };
                        let node = fs.attach_loaded(dir, name, data);
                        pending.push((node, children));
                    }
                    StoredNode::File {
                        name,
                        extension,
                        content,
                    } => {
                        fs.attach_loaded(dir, name, NodeData::File { extension, content });
                    }
                }
            }
        }

        info!(
            target: TARGET,
            "reconstructed filesystem {} ({} nodes)",
            fs.id,
            fs.node_count()
        );
        Ok(fs)
    }

    /// Insert a loaded node as the last child of `dir`, without syncing
    fn attach_loaded(&mut self, dir: NodeId, name: String, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.insert(Node {
            name,
            fs: self.id.clone(),
            parent: Some(dir),
            data,
        }));
        if let NodeData::Directory { children } = &mut self.nodes[dir.0].data {
            children.push(id);
        }
        id
    }

    /// Rebuild from a JSON record
    pub fn from_json(json: &str, id: FsId, storage: Rc<dyn Storage>) -> FsResult<Self> {
        Self::reconstruct(StoredFs::from_json(json)?, id, storage)
    }

    /// Load the persisted record for `id`, if there is one
    pub fn load(id: FsId, storage: Rc<dyn Storage>) -> FsResult<Option<Self>> {
        match storage.load(&id.storage_key())? {
            Some(json) => Self::from_json(&json, id, storage).map(Some),
            None => Ok(None),
        }
    }

    /// Load the persisted record for `id`, or create a fresh filesystem
    pub fn open(id: FsId, storage: Rc<dyn Storage>) -> FsResult<Self> {
        match Self::load(id.clone(), storage.clone())? {
            Some(fs) => Ok(fs),
            None => Self::init(id, storage),
        }
    }
}
