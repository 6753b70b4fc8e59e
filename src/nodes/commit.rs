//! Commit nodes

use crate::error::{CatfsError, Result};
use crate::nodes::{hasher, Base, Node, NodeLinker};
use crate::types::Hash;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Author shown for the staging commit
pub const AUTHOR_OF_STAGE: &str = "unknown";

/// Remembers the last successful sync with a remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMarker {
    /// Owner of the remote we merged with
    pub with: String,
    /// Remote commit that was merged
    pub head: Hash,
}

/// A snapshot of the whole tree
///
/// The tree hash of a commit is only defined once it was boxed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub(crate) base: Base,
    pub(crate) message: String,
    pub(crate) author: String,
    pub(crate) root: Hash,
    pub(crate) parent: Option<Hash>,
    pub(crate) index: u64,
    pub(crate) merge: Option<MergeMarker>,
}

impl Commit {
    pub fn new(inode: u64, index: u64) -> Self {
        Self {
            base: Base::new("", AUTHOR_OF_STAGE, inode),
            message: String::new(),
            author: AUTHOR_OF_STAGE.to_string(),
            root: Hash::EMPTY,
            parent: None,
            index,
            merge: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    /// Commits live below a virtual snapshot directory
    pub fn path(&self) -> String {
        format!("/.snapshots/{}", self.base.name)
    }

    pub fn tree_hash(&self) -> Hash {
        self.base.tree_hash
    }

    pub fn inode(&self) -> u64 {
        self.base.inode
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn parent(&self) -> Option<Hash> {
        self.parent
    }

    pub fn merge_marker(&self) -> Option<&MergeMarker> {
        self.merge.as_ref()
    }

    pub fn is_boxed(&self) -> bool {
        !self.base.tree_hash.is_empty()
    }

    pub fn set_root(&mut self, root: Hash) {
        self.root = root;
    }

    pub fn set_parent(&mut self, parent: Option<Hash>) {
        self.parent = parent;
    }

    pub fn set_mod_time_now(&mut self) {
        self.base.mod_time = Utc::now();
    }

    pub fn set_merge_marker(&mut self, with: &str, head: Hash) {
        self.merge = Some(MergeMarker {
            with: with.to_string(),
            head,
        });
    }

    /// Finalize the commit: fix author and message and compute its hash
    pub fn box_commit(&mut self, author: &str, message: &str) {
        self.author = author.to_string();
        self.message = message.to_string();
        self.base.user = author.to_string();
        self.base.tree_hash =
            hasher::commit_hash(self.parent.as_ref(), &self.root, author, message);
        self.base.content_hash = self.root;
        self.base.name = self.base.tree_hash.to_hex();
    }

    /// The commit before this one, if any
    pub fn parent_commit(&self, lkr: &dyn NodeLinker) -> Result<Option<Commit>> {
        let Some(parent) = self.parent else {
            return Ok(None);
        };

        match lkr.node_by_hash(&parent)? {
            Some(Node::Commit(cmt)) => Ok(Some(cmt)),
            Some(other) => Err(CatfsError::BadNode(format!(
                "parent of commit {} is a {}",
                self.base.tree_hash.short(),
                other.node_type()
            ))),
            None => Err(CatfsError::NoSuchHash(parent)),
        }
    }
}
