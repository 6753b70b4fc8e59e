//! Directory nodes
//!
//! A directory stores, per child name, the child's tree hash (`children`)
//! and, for non-ghost children, its content hash (`contents`). Both maps are
//! ordered, so the sorted child order is simply their key order.
//!
//! Adding or removing a child changes the directory's hashes, which in turn
//! changes every ancestor up to the root. [`Directory::add`] and
//! [`Directory::remove_child`] walk that chain through the linker and swap
//! each updated ancestor into its memory index.

use crate::error::{CatfsError, Result};
use crate::nodes::{hasher, path, Base, Node, NodeLinker};
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub(crate) base: Base,
    pub(crate) size: u64,
    pub(crate) cached_size: u64,
    pub(crate) parent_name: String,
    pub(crate) children: BTreeMap<String, Hash>,
    pub(crate) contents: BTreeMap<String, Hash>,
}

#[derive(Clone, Copy)]
enum SizeDelta {
    Grow(u64, u64),
    Shrink(u64, u64),
    Keep,
}

impl SizeDelta {
    fn apply(self, dir: &mut Directory) {
        match self {
            SizeDelta::Grow(size, cached) => {
                dir.size = dir.size.saturating_add(size);
                dir.cached_size = dir.cached_size.saturating_add(cached);
            }
            SizeDelta::Shrink(size, cached) => {
                dir.size = dir.size.saturating_sub(size);
                dir.cached_size = dir.cached_size.saturating_sub(cached);
            }
            SizeDelta::Keep => {}
        }
    }
}

impl Directory {
    /// A new, empty directory that is not linked anywhere yet
    pub fn new(name: &str, user: &str, inode: u64) -> Self {
        let mut dir = Self::empty(name, user, inode, "/");
        dir.recompute();
        dir
    }

    /// A new, empty root directory
    pub fn new_root(user: &str, inode: u64) -> Self {
        let mut dir = Self::empty("", user, inode, "");
        dir.recompute();
        dir
    }

    fn empty(name: &str, user: &str, inode: u64, parent_name: &str) -> Self {
        Self {
            base: Base::new(name, user, inode),
            size: 0,
            cached_size: 0,
            parent_name: parent_name.to_string(),
            children: BTreeMap::new(),
            contents: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn is_root(&self) -> bool {
        self.base.name.is_empty()
    }

    pub fn path(&self) -> String {
        if self.is_root() {
            return "/".to_string();
        }

        path::join(&self.parent_name, &self.base.name)
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

    pub fn tree_hash(&self) -> Hash {
        self.base.tree_hash
    }

    pub fn content_hash(&self) -> Hash {
        self.base.content_hash
    }

    pub fn user(&self) -> &str {
        &self.base.user
    }

    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    /// Child names in lexical order
    pub fn order(&self) -> Vec<&str> {
        self.children.keys().map(|name| name.as_str()).collect()
    }

    pub fn child_hash(&self, name: &str) -> Option<Hash> {
        self.children.get(name).copied()
    }

    pub fn set_user(&mut self, user: &str) {
        self.base.user = user.to_string();
    }

    /// Resolve the child called `name`
    pub fn child(&self, lkr: &dyn NodeLinker, name: &str) -> Result<Option<Node>> {
        let Some(hash) = self.children.get(name) else {
            return Ok(None);
        };

        match lkr.node_by_hash(hash)? {
            Some(nd) => Ok(Some(nd)),
            None => Err(CatfsError::BadNode(format!(
                "dead link in tree: {} => {}",
                path::join(&self.path(), name),
                hash
            ))),
        }
    }

    /// All children, sorted by name
    pub fn children_sorted(&self, lkr: &dyn NodeLinker) -> Result<Vec<Node>> {
        let mut children = Vec::with_capacity(self.children.len());
        for name in self.children.keys() {
            if let Some(child) = self.child(lkr, name)? {
                children.push(child);
            }
        }

        Ok(children)
    }

    /// Resolve `repo_path` relative to this directory.
    ///
    /// A ghost is only returned if it is the last path element; passing
    /// through a ghost or a file is `NoSuchFile`.
    pub fn lookup(&self, lkr: &dyn NodeLinker, repo_path: &str) -> Result<Node> {
        let elems = path::split(repo_path);
        let mut curr = Node::Directory(self.clone());

        for (idx, elem) in elems.iter().enumerate() {
            let next = match &curr {
                Node::Directory(dir) => dir.child(lkr, elem)?,
                _ => None,
            };

            curr = next.ok_or_else(|| CatfsError::NoSuchFile(path::clean(repo_path)))?;
            if curr.is_ghost() && idx != elems.len() - 1 {
                return Err(CatfsError::NoSuchFile(path::clean(repo_path)));
            }
        }

        Ok(curr)
    }

    pub(crate) fn recompute(&mut self) {
        self.base.tree_hash = hasher::directory_tree_hash(&self.path(), &self.children);
        self.base.content_hash = hasher::directory_content_hash(&self.contents);
    }

    pub(crate) fn rehash(&mut self, lkr: &dyn NodeLinker) {
        let old_hash = self.base.tree_hash;
        self.recompute();
        lkr.mem_index_swap(&Node::Directory(self.clone()), &old_hash);
    }

    /// Link `nd` into this directory.
    ///
    /// A ghost occupying the same name is replaced; any other existing child
    /// is an error. `nd` is updated in place (its parent and hash change).
    pub fn add(&mut self, lkr: &dyn NodeLinker, nd: &mut Node) -> Result<()> {
        let name = nd.name().to_string();
        if name.is_empty() {
            return Err(CatfsError::InvalidOperation(
                "cannot add a node without name".to_string(),
            ));
        }

        if nd.inode() == self.base.inode && !nd.is_ghost() {
            return Err(CatfsError::InvalidOperation(format!(
                "attempting to add {} to itself",
                self.path()
            )));
        }

        if self.children.contains_key(&name) {
            match self.child(lkr, &name)? {
                Some(twin) if twin.is_ghost() => self.remove_child(lkr, &twin)?,
                _ => return Err(CatfsError::Exists(path::join(&self.path(), &name))),
            }
        }

        nd.set_parent_path(lkr, &self.path())?;

        let delta = if nd.is_ghost() {
            SizeDelta::Keep
        } else {
            self.contents.insert(name.clone(), nd.content_hash());
            SizeDelta::Grow(nd.size(), nd.cached_size())
        };

        self.children.insert(name, nd.tree_hash());
        lkr.mem_index_add(nd);

        delta.apply(self);
        self.rehash(lkr);
        self.propagate(lkr, delta)
    }

    /// Unlink `nd` from this directory
    pub fn remove_child(&mut self, lkr: &dyn NodeLinker, nd: &Node) -> Result<()> {
        let name = nd.name();
        if self.children.remove(name).is_none() {
            return Err(CatfsError::NoSuchFile(path::join(&self.path(), name)));
        }

        self.contents.remove(name);

        let delta = if nd.is_ghost() {
            SizeDelta::Keep
        } else {
            SizeDelta::Shrink(nd.size(), nd.cached_size())
        };

        lkr.mem_index_purge(nd);
        delta.apply(self);
        self.rehash(lkr);
        self.propagate(lkr, delta)
    }

    /// Carry this directory's new hashes (and a size change) up to the root
    fn propagate(&self, lkr: &dyn NodeLinker, delta: SizeDelta) -> Result<()> {
        let mut last = self.clone();
        while !last.is_root() {
            let mut parent = lkr.lookup_node(&last.parent_name)?.into_directory()?;
            parent.children.insert(last.base.name.clone(), last.tree_hash());
            parent.contents.insert(last.base.name.clone(), last.content_hash());
            delta.apply(&mut parent);
            parent.rehash(lkr);
            last = parent;
        }

        Ok(())
    }

    /// Rewrite this directory and its subtree to live at `new_path`.
    /// The caller links the result into its new parent with [`Directory::add`].
    pub fn notify_move(self, lkr: &dyn NodeLinker, new_path: &str) -> Result<Directory> {
        Node::Directory(self).relocate(lkr, new_path)?.into_directory()
    }
}
