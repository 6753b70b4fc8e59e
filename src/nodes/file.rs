//! File nodes

use crate::nodes::{hasher, path, Base, Node, NodeLinker};
use crate::types::Hash;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A regular file
///
/// The file's bytes live in the external content store; the node only keeps
/// the hashes pointing there plus the (opaque) encryption key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub(crate) base: Base,
    pub(crate) size: u64,
    pub(crate) cached_size: u64,
    pub(crate) parent: String,
    pub(crate) key: Vec<u8>,
}

impl File {
    /// A new, empty file that is not linked into any directory yet
    pub fn new(name: &str, user: &str, inode: u64) -> Self {
        let mut file = Self {
            base: Base::new(name, user, inode),
            size: 0,
            cached_size: 0,
            parent: "/".to_string(),
            key: Vec::new(),
        };
        file.base.tree_hash = hasher::file_tree_hash(&file.path(), &file.base.content_hash);
        file
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn path(&self) -> String {
        path::join(&self.parent, &self.base.name)
    }

    pub fn parent_path(&self) -> &str {
        &self.parent
    }

    pub fn inode(&self) -> u64 {
        self.base.inode
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn cached_size(&self) -> u64 {
        self.cached_size
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn tree_hash(&self) -> Hash {
        self.base.tree_hash
    }

    pub fn content_hash(&self) -> Hash {
        self.base.content_hash
    }

    pub fn backend_hash(&self) -> Hash {
        self.base.backend_hash
    }

    pub fn user(&self) -> &str {
        &self.base.user
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.base.mod_time = Utc::now();
    }

    pub fn set_cached_size(&mut self, cached_size: u64) {
        self.cached_size = cached_size;
    }

    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
    }

    pub fn set_backend(&mut self, backend: Hash) {
        self.base.backend_hash = backend;
    }

    pub fn set_user(&mut self, user: &str) {
        self.base.user = user.to_string();
    }

    /// Change the content hash; the tree hash follows
    pub fn set_content(&mut self, lkr: &dyn NodeLinker, content: Hash) {
        self.base.content_hash = content;
        self.base.mod_time = Utc::now();
        self.rehash(lkr);
    }

    pub(crate) fn rehash(&mut self, lkr: &dyn NodeLinker) {
        let old_hash = self.base.tree_hash;
        self.base.tree_hash = hasher::file_tree_hash(&self.path(), &self.base.content_hash);
        lkr.mem_index_swap(&Node::File(self.clone()), &old_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::mock::MockLinker;

    #[test]
    fn test_content_change_rehashes() {
        let lkr = MockLinker::new();
        let mut file = File::new("x", "alice", 7);
        let before = file.tree_hash();
        file.set_content(&lkr, hasher::content_hash(b"data"));
        assert_ne!(file.tree_hash(), before);
        assert_eq!(file.content_hash(), hasher::content_hash(b"data"));
        assert_eq!(file.path(), "/x");

        // The cache knows the new version, not the old one
        assert!(lkr.node_by_hash(&file.tree_hash()).unwrap().is_some());
        assert!(lkr.node_by_hash(&before).unwrap().is_none());
    }

    #[test]
    fn test_copy_keeps_content() {
        let lkr = MockLinker::new();
        let mut file = File::new("x", "alice", 7);
        file.set_content(&lkr, hasher::content_hash(b"data"));
        file.set_size(4);

        let copy = Node::File(file.clone()).copy_with_inode(8);
        assert_eq!(copy.inode(), 8);
        assert_eq!(copy.content_hash(), file.content_hash());
        assert_eq!(copy.size(), 4);
    }
}
