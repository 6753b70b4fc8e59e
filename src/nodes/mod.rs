//! Node model
//!
//! Every object in the versioned tree is a [`Node`]: a file, a directory, a
//! commit or a ghost (the tombstone a removed or moved node leaves behind).
//! Nodes are plain values. Mutating methods take the [`NodeLinker`] they
//! belong to so that hash changes are mirrored into the linker's caches and
//! propagated up to the root.

pub mod commit;
pub mod directory;
pub mod file;
pub mod ghost;
pub mod hasher;
pub mod path;

pub use commit::{Commit, MergeMarker, AUTHOR_OF_STAGE};
pub use directory::Directory;
pub use file::File;
pub use ghost::Ghost;

use crate::error::{CatfsError, Result};
use crate::types::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminator of the node variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Directory,
    Commit,
    Ghost,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::File => "file",
            NodeType::Directory => "directory",
            NodeType::Commit => "commit",
            NodeType::Ghost => "ghost",
        };
        f.write_str(s)
    }
}

/// Attributes shared by every node variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub(crate) name: String,
    pub(crate) user: String,
    pub(crate) tree_hash: Hash,
    pub(crate) content_hash: Hash,
    pub(crate) backend_hash: Hash,
    pub(crate) mod_time: DateTime<Utc>,
    pub(crate) inode: u64,
}

impl Base {
    pub(crate) fn new(name: &str, user: &str, inode: u64) -> Self {
        Self {
            name: name.to_string(),
            user: user.to_string(),
            tree_hash: Hash::EMPTY,
            content_hash: Hash::EMPTY,
            backend_hash: Hash::EMPTY,
            mod_time: Utc::now(),
            inode,
        }
    }

    /// Same attributes, different identity
    pub(crate) fn copy_with_inode(&self, inode: u64) -> Self {
        Self {
            inode,
            ..self.clone()
        }
    }
}

/// The seam between nodes and the linker that owns them
pub trait NodeLinker {
    /// Resolve a node by tree hash; `None` if it is unknown
    fn node_by_hash(&self, hash: &Hash) -> Result<Option<Node>>;

    /// Resolve `path` in the current (staging) tree
    fn lookup_node(&self, path: &str) -> Result<Node>;

    /// Remember `nd` in the in-memory index
    fn mem_index_add(&self, nd: &Node);

    /// Replace the cached entry known under `old_hash` with `nd`
    fn mem_index_swap(&self, nd: &Node, old_hash: &Hash);

    /// Forget `nd` (and anything cached below its path)
    fn mem_index_purge(&self, nd: &Node);
}

/// A single node of the versioned tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    File(File),
    Directory(Directory),
    Commit(Commit),
    Ghost(Ghost),
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::File(_) => NodeType::File,
            Node::Directory(_) => NodeType::Directory,
            Node::Commit(_) => NodeType::Commit,
            Node::Ghost(_) => NodeType::Ghost,
        }
    }

    pub(crate) fn base(&self) -> &Base {
        match self {
            Node::File(f) => &f.base,
            Node::Directory(d) => &d.base,
            Node::Commit(c) => &c.base,
            Node::Ghost(g) => &g.base,
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut Base {
        match self {
            Node::File(f) => &mut f.base,
            Node::Directory(d) => &mut d.base,
            Node::Commit(c) => &mut c.base,
            Node::Ghost(g) => &mut g.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn user(&self) -> &str {
        &self.base().user
    }

    pub fn tree_hash(&self) -> Hash {
        self.base().tree_hash
    }

    pub fn content_hash(&self) -> Hash {
        self.base().content_hash
    }

    pub fn backend_hash(&self) -> Hash {
        self.base().backend_hash
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        self.base().mod_time
    }

    pub fn inode(&self) -> u64 {
        self.base().inode
    }

    /// Absolute path of this node
    pub fn path(&self) -> String {
        match self {
            Node::File(f) => f.path(),
            Node::Directory(d) => d.path(),
            Node::Commit(c) => c.path(),
            Node::Ghost(g) => g.path().to_string(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::File(f) => f.size(),
            Node::Directory(d) => d.size(),
            Node::Commit(_) => 0,
            Node::Ghost(g) => g.old_node().size(),
        }
    }

    pub fn cached_size(&self) -> u64 {
        match self {
            Node::File(f) => f.cached_size(),
            Node::Directory(d) => d.cached_size(),
            Node::Commit(_) => 0,
            Node::Ghost(g) => g.old_node().cached_size(),
        }
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self, Node::Ghost(_))
    }

    pub fn set_user(&mut self, user: &str) {
        self.base_mut().user = user.to_string();
    }

    pub fn set_mod_time(&mut self, mod_time: DateTime<Utc>) {
        self.base_mut().mod_time = mod_time;
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            Node::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_ghost(&self) -> Option<&Ghost> {
        match self {
            Node::Ghost(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Node::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_file(self) -> Result<File> {
        match self {
            Node::File(f) => Ok(f),
            other => Err(other.unexpected(NodeType::File)),
        }
    }

    pub fn into_directory(self) -> Result<Directory> {
        match self {
            Node::Directory(d) => Ok(d),
            other => Err(other.unexpected(NodeType::Directory)),
        }
    }

    pub fn into_ghost(self) -> Result<Ghost> {
        match self {
            Node::Ghost(g) => Ok(g),
            other => Err(other.unexpected(NodeType::Ghost)),
        }
    }

    pub fn into_commit(self) -> Result<Commit> {
        match self {
            Node::Commit(c) => Ok(c),
            other => Err(other.unexpected(NodeType::Commit)),
        }
    }

    fn unexpected(&self, wanted: NodeType) -> CatfsError {
        CatfsError::BadNode(format!(
            "expected {} at {}, found {}",
            wanted,
            self.path(),
            self.node_type()
        ))
    }

    /// Shallow copy carrying a new inode
    pub fn copy_with_inode(&self, inode: u64) -> Node {
        let mut copy = self.clone();
        let base = copy.base().copy_with_inode(inode);
        *copy.base_mut() = base;
        copy
    }

    /// Hook this node below the directory at `parent_path` and rehash it
    pub(crate) fn set_parent_path(&mut self, lkr: &dyn NodeLinker, parent_path: &str) -> Result<()> {
        match self {
            Node::File(f) => {
                f.parent = path::clean(parent_path);
                f.rehash(lkr);
            }
            Node::Directory(d) => {
                d.parent_name = path::clean(parent_path);
                d.rehash(lkr);
            }
            Node::Ghost(g) => {
                let ghost_path = path::join(parent_path, &g.base.name);
                g.set_ghost_path(lkr, &ghost_path);
            }
            Node::Commit(_) => {
                return Err(CatfsError::bad_node("commits cannot be part of a tree"));
            }
        }

        Ok(())
    }

    /// Rewrite this node (and every node below it) to live at `new_path`.
    /// All rewritten nodes are swapped into the linker's memory index.
    pub(crate) fn relocate(self, lkr: &dyn NodeLinker, new_path: &str) -> Result<Node> {
        let new_path = path::clean(new_path);
        match self {
            Node::File(mut f) => {
                f.parent = path::dirname(&new_path);
                f.base.name = path::basename(&new_path);
                f.rehash(lkr);
                Ok(Node::File(f))
            }
            Node::Ghost(mut g) => {
                g.set_ghost_path(lkr, &new_path);
                Ok(Node::Ghost(g))
            }
            Node::Directory(mut d) => {
                let names: Vec<String> = d.children.keys().cloned().collect();
                for name in names {
                    let child = d.child(lkr, &name)?.ok_or_else(|| {
                        CatfsError::BadNode(format!("dead link in tree: {}/{}", d.path(), name))
                    })?;
                    let moved = child.relocate(lkr, &path::join(&new_path, &name))?;
                    d.children.insert(name, moved.tree_hash());
                }

                d.parent_name = path::dirname(&new_path);
                d.base.name = path::basename(&new_path);
                d.rehash(lkr);
                Ok(Node::Directory(d))
            }
            Node::Commit(_) => Err(CatfsError::bad_node("commits cannot be moved")),
        }
    }

    /// Encode for the key-value store
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a node written by [`Node::marshal`]
    pub fn unmarshal(data: &[u8]) -> Result<Node> {
        Ok(bincode::deserialize(data)?)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {}:{}:{}>",
            self.node_type(),
            self.path(),
            self.tree_hash().short(),
            self.inode()
        )
    }
}

impl From<File> for Node {
    fn from(f: File) -> Self {
        Node::File(f)
    }
}

impl From<Directory> for Node {
    fn from(d: Directory) -> Self {
        Node::Directory(d)
    }
}

impl From<Ghost> for Node {
    fn from(g: Ghost) -> Self {
        Node::Ghost(g)
    }
}

impl From<Commit> for Node {
    fn from(c: Commit) -> Self {
        Node::Commit(c)
    }
}

/// Return value of a walk visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into this directory (breadth-first walks only)
    SkipChildren,
}

/// Visit `node` and everything below it.
///
/// With `dfs` set, children are visited before their directory (post-order);
/// otherwise directories come first and may skip their children.
pub fn walk<F>(lkr: &dyn NodeLinker, node: &Node, dfs: bool, visit: &mut F) -> Result<()>
where
    F: FnMut(&Node) -> Result<WalkControl>,
{
    let dir = match node {
        Node::Directory(dir) => dir,
        other => {
            visit(other)?;
            return Ok(());
        }
    };

    if !dfs && visit(node)? == WalkControl::SkipChildren {
        return Ok(());
    }

    for name in dir.children.keys() {
        let child = dir.child(lkr, name)?.ok_or_else(|| {
            CatfsError::BadNode(format!("walk: could not resolve {}/{}", dir.path(), name))
        })?;
        walk(lkr, &child, dfs, visit)?;
    }

    if dfs {
        visit(node)?;
    }

    Ok(())
}

/// The directory `nd` lives in
pub fn parent_directory(lkr: &dyn NodeLinker, nd: &Node) -> Result<Option<Directory>> {
    let node_path = nd.path();
    if node_path == "/" {
        return Ok(None);
    }

    let parent = lkr.lookup_node(&path::dirname(&node_path))?;
    parent.into_directory().map(Some)
}

#[cfg(test)]
pub(crate) mod mock {
    //! Minimal linker keeping everything in memory, for node unit tests

    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    pub struct MockLinker {
        index: RefCell<HashMap<Hash, Node>>,
        root: RefCell<Option<Directory>>,
        next: RefCell<u64>,
    }

    impl MockLinker {
        pub fn new() -> Self {
            let lkr = Self {
                index: RefCell::new(HashMap::new()),
                root: RefCell::new(None),
                next: RefCell::new(1),
            };
            let mut root = Directory::new_root("alice", lkr.next_inode());
            root.rehash(&lkr);
            lkr
        }

        pub fn next_inode(&self) -> u64 {
            let mut next = self.next.borrow_mut();
            *next += 1;
            *next - 1
        }

        pub fn root(&self) -> Directory {
            self.root.borrow().clone().expect("root is set")
        }
    }

    impl NodeLinker for MockLinker {
        fn node_by_hash(&self, hash: &Hash) -> Result<Option<Node>> {
            Ok(self.index.borrow().get(hash).cloned())
        }

        fn lookup_node(&self, path: &str) -> Result<Node> {
            self.root().lookup(self, path)
        }

        fn mem_index_add(&self, nd: &Node) {
            self.index.borrow_mut().insert(nd.tree_hash(), nd.clone());
            if let Node::Directory(dir) = nd {
                if dir.is_root() {
                    *self.root.borrow_mut() = Some(dir.clone());
                }
            }
        }

        fn mem_index_swap(&self, nd: &Node, old_hash: &Hash) {
            self.index.borrow_mut().remove(old_hash);
            self.mem_index_add(nd);
        }

        fn mem_index_purge(&self, nd: &Node) {
            self.index.borrow_mut().remove(&nd.tree_hash());
        }
    }
}
