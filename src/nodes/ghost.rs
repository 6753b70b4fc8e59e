//! Ghost nodes
//!
//! A ghost takes the place of a removed or moved node. It keeps a full copy
//! of the node it replaced, so history can still be traced through it, but
//! gets its own inode for the slot it occupies.

use crate::error::{CatfsError, Result};
use crate::nodes::{hasher, path, Base, Directory, File, Node, NodeLinker, NodeType};
use crate::types::Hash;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ghost {
    pub(crate) base: Base,
    pub(crate) ghost_path: String,
    pub(crate) old: Box<Node>,
}

impl Ghost {
    /// Turn `old` into a ghost with its own `inode`.
    /// Only files and directories can become ghosts.
    pub fn new(lkr: &dyn NodeLinker, old: Node, inode: u64) -> Result<Self> {
        if !matches!(old, Node::File(_) | Node::Directory(_)) {
            return Err(CatfsError::BadNode(format!(
                "cannot make a ghost of {}",
                old.node_type()
            )));
        }

        let ghost_path = old.path();
        let mut base = Base::new(&path::basename(&ghost_path), old.user(), inode);
        base.content_hash = old.content_hash();
        base.backend_hash = old.backend_hash();
        base.mod_time = Utc::now();

        let mut ghost = Self {
            base,
            ghost_path: String::new(),
            old: Box::new(old),
        };
        ghost.set_ghost_path(lkr, &ghost_path);
        Ok(ghost)
    }

    pub fn path(&self) -> &str {
        &self.ghost_path
    }

    pub fn inode(&self) -> u64 {
        self.base.inode
    }

    pub fn tree_hash(&self) -> Hash {
        self.base.tree_hash
    }

    /// The node this ghost replaced
    pub fn old_node(&self) -> &Node {
        &self.old
    }

    pub fn old_type(&self) -> NodeType {
        self.old.node_type()
    }

    pub fn old_file(&self) -> Result<File> {
        (*self.old).clone().into_file()
    }

    pub fn old_directory(&self) -> Result<Directory> {
        (*self.old).clone().into_directory()
    }

    /// Re-home the ghost to `ghost_path`, rehashing it
    pub fn set_ghost_path(&mut self, lkr: &dyn NodeLinker, ghost_path: &str) {
        let old_hash = self.base.tree_hash;
        self.ghost_path = path::clean(ghost_path);
        self.base.name = path::basename(&self.ghost_path);
        self.base.tree_hash = hasher::ghost_tree_hash(&self.ghost_path, &self.old.tree_hash());
        lkr.mem_index_swap(&Node::Ghost(self.clone()), &old_hash);
    }
}
