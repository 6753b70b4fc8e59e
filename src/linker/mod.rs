//! Linker
//!
//! The linker owns the versioned node graph. It keeps a staging commit
//! (`stage/STATUS`) whose root is the mutable working tree, and a linear
//! chain of finalized commits. Everything is persisted in a [`Database`]
//! using the following key layout:
//!
//! ```text
//! objects/<HASH>                 committed node
//! tree/<PATH>                    committed path -> hash (directories end in "/.")
//! stage/objects/<HASH>           staged node
//! stage/tree/<PATH>              staged path -> hash
//! stage/STATUS                   staging commit
//! stage/moves/<INODE>            staged move line
//! stage/moves/overlay/<INODE>    staged move line
//! moves/<COMMIT>/<HASH>          committed move line
//! moves/overlay/<HASH>           committed move line
//! inode/<INODE>                  latest hash of an inode
//! index/<INDEX>                  commit hash by index
//! refs/<NAME>                    commit hash (lower case names)
//! metadata/<KEY>                 free-form values ("owner", ...)
//! stats/node-count               last handed out inode
//! ```
//!
//! Hashes are hex encoded. Nodes are kept in an in-memory index (by hash
//! and by path) which mirrors every in-flight mutation; it can be dropped
//! at any time and is rebuilt lazily from the store.

pub mod coreutils;
pub mod gc;
pub mod moves;

pub use gc::GarbageCollector;
pub use moves::MoveDir;

use crate::error::{CatfsError, Result};
use crate::nodes::{
    path, walk, Commit, Directory, File, Ghost, Node, NodeLinker, WalkControl, AUTHOR_OF_STAGE,
};
use crate::store::{Batch, Database};
use crate::trie::Trie;
use crate::types::Hash;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

const STATUS_KEY: &str = "stage/STATUS";
const NODE_COUNT_KEY: &str = "stats/node-count";

pub(crate) fn object_key(hash: &Hash) -> String {
    format!("objects/{}", hash)
}

pub(crate) fn stage_object_key(hash: &Hash) -> String {
    format!("stage/objects/{}", hash)
}

pub(crate) fn inode_key(inode: u64) -> String {
    format!("inode/{}", inode)
}

fn ref_key(name: &str) -> String {
    format!("refs/{}", name.to_lowercase())
}

/// Directories are marked with a trailing "." segment
fn append_dot(path: &str) -> String {
    if path.ends_with('/') {
        format!("{}.", path)
    } else {
        format!("{}/.", path)
    }
}

fn tree_key(prefix: &str, nd: &Node) -> String {
    let node_path = nd.path();
    match nd {
        Node::Directory(_) => format!("{}{}", prefix, append_dot(&node_path)),
        _ => format!("{}{}", prefix, node_path),
    }
}

fn decode_hash(raw: &[u8]) -> Result<Hash> {
    let text = String::from_utf8_lossy(raw);
    Hash::from_hex(text.trim())
        .ok_or_else(|| CatfsError::BadNode(format!("invalid hash reference: {}", text)))
}

#[derive(Default)]
struct MemIndex {
    by_hash: HashMap<Hash, Node>,
    by_path: Trie<Node>,
    root: Option<Directory>,
}

/// Owner of the versioned node graph
pub struct Linker {
    kv: Arc<Database>,
    index: Mutex<MemIndex>,
    owner: Mutex<Option<String>>,
}

impl Linker {
    pub fn new(kv: Arc<Database>) -> Self {
        Self {
            kv,
            index: Mutex::new(MemIndex::default()),
            owner: Mutex::new(None),
        }
    }

    /// The key-value store this linker writes to
    pub fn kv(&self) -> &Database {
        &self.kv
    }

    pub fn kv_handle(&self) -> Arc<Database> {
        Arc::clone(&self.kv)
    }

    ///////////////////////////
    // IN-MEMORY INDEX       //
    ///////////////////////////

    fn mem_add(&self, nd: &Node, update_path: bool) {
        let mut index = self.index.lock();
        index.by_hash.insert(nd.tree_hash(), nd.clone());
        if update_path {
            index.by_path.insert(&nd.path(), nd.clone());
        }
    }

    fn mem_set_root(&self, root: Directory) {
        let mut index = self.index.lock();
        if let Some(old) = index.root.take() {
            index.by_hash.remove(&old.tree_hash());
        }

        let nd = Node::Directory(root.clone());
        index.by_hash.insert(root.tree_hash(), nd.clone());
        index.by_path.insert("/", nd);
        index.root = Some(root);
    }

    /// Forget one cached node version, keeping the path index intact
    pub(crate) fn mem_index_forget(&self, hash: &Hash) {
        self.index.lock().by_hash.remove(hash);
    }

    /// Drop all cached nodes; they will be reloaded from the store
    pub fn mem_index_clear(&self) {
        let mut index = self.index.lock();
        *index = MemIndex::default();
    }

    ///////////////////////////
    // COMMON NODE HANDLING  //
    ///////////////////////////

    /// Hand out a new, never used inode
    pub fn next_inode(&self) -> Result<u64> {
        self.atomic_with_batch(|batch| {
            let count = match self.kv.get(NODE_COUNT_KEY)? {
                Some(raw) => {
                    let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                        CatfsError::BadNode("corrupt inode counter".to_string())
                    })?;
                    u64::from_be_bytes(bytes) + 1
                }
                None => 1,
            };

            batch.put(NODE_COUNT_KEY, count.to_be_bytes().to_vec());
            Ok(count)
        })
    }

    fn load_node(&self, hash: &Hash) -> Result<Option<Node>> {
        for key in [stage_object_key(hash), object_key(hash)] {
            if let Some(data) = self.kv.get(&key)? {
                return Node::unmarshal(&data).map(Some);
            }
        }

        Ok(None)
    }

    /// Node with tree hash `hash`: memory first, then staging, then committed store
    pub fn node_by_hash(&self, hash: &Hash) -> Result<Option<Node>> {
        if let Some(nd) = self.index.lock().by_hash.get(hash) {
            return Ok(Some(nd.clone()));
        }

        let Some(nd) = self.load_node(hash)? else {
            return Ok(None);
        };

        self.mem_add(&nd, false);
        Ok(Some(nd))
    }

    /// Latest version of the node with `inode`
    pub fn node_by_inode(&self, inode: u64) -> Result<Option<Node>> {
        match self.kv.get(&inode_key(inode))? {
            Some(raw) => self.node_by_hash(&decode_hash(&raw)?),
            None => Ok(None),
        }
    }

    /// Resolve `node_path` through the path index and the stored path keys.
    /// Unlike [`Linker::lookup_node`] this does not walk from the root.
    pub fn resolve_node(&self, node_path: &str) -> Result<Option<Node>> {
        let node_path = path::clean(node_path);
        if let Some(nd) = self.index.lock().by_path.get(&node_path) {
            return Ok(Some(nd.clone()));
        }

        let dotted = append_dot(&node_path);
        let candidates = [
            format!("stage/tree{}", dotted),
            format!("stage/tree{}", node_path),
            format!("tree{}", dotted),
            format!("tree{}", node_path),
        ];

        for key in candidates {
            if let Some(raw) = self.kv.get(&key)? {
                return self.node_by_hash(&decode_hash(&raw)?);
            }
        }

        Ok(None)
    }

    pub fn resolve_directory(&self, dir_path: &str) -> Result<Option<Directory>> {
        match self.resolve_node(dir_path)? {
            Some(nd) => nd.into_directory().map(Some),
            None => Ok(None),
        }
    }

    /// Content hashes (backend hashes) to the files carrying them
    pub fn files_by_contents(&self, contents: &[Hash]) -> Result<BTreeMap<Hash, File>> {
        let wanted: HashSet<&Hash> = contents.iter().collect();
        let mut result = BTreeMap::new();

        for prefix in ["objects", "stage/objects"] {
            for key in self.kv.keys(prefix)? {
                let Some(data) = self.kv.get(&key)? else {
                    continue;
                };

                if let Node::File(file) = Node::unmarshal(&data)? {
                    if wanted.contains(&file.backend_hash()) {
                        result.insert(file.backend_hash(), file);
                    }
                }
            }
        }

        Ok(result)
    }

    ///////////////////////////
    // STAGING               //
    ///////////////////////////

    /// Persist `nd` (and all of its ancestors) in the staging area
    pub fn stage_node(&self, nd: &Node) -> Result<()> {
        self.atomic_with_batch(|batch| {
            self.stage_node_recursive(batch, nd)?;

            let mut status = self.status()?;
            let root = self.root()?;
            status.set_mod_time_now();
            status.set_root(root.tree_hash());
            self.save_status(&mut status)
        })
    }

    fn stage_node_recursive(&self, batch: &Batch<'_>, nd: &Node) -> Result<()> {
        let mut curr = nd.clone();
        loop {
            if let Node::Commit(_) = curr {
                return Err(CatfsError::InvalidOperation(
                    "commits cannot be staged; use make_commit".to_string(),
                ));
            }

            let hex = curr.tree_hash().to_hex();
            batch.put(&stage_object_key(&curr.tree_hash()), curr.marshal()?);
            batch.put(&inode_key(curr.inode()), hex.clone());
            batch.put(&tree_key("stage/tree", &curr), hex);
            self.mem_add(&curr, true);

            let curr_path = curr.path();
            if curr_path == "/" {
                let root = curr.into_directory()?;
                self.mem_set_root(root);
                return Ok(());
            }

            curr = match self.lookup_node(&path::dirname(&curr_path)) {
                Ok(parent) => parent,
                Err(err) if err.is_no_such_file() => return Ok(()),
                Err(err) => return Err(err),
            };
        }
    }

    ///////////////////////////
    // COMMITS               //
    ///////////////////////////

    /// Record that the next commit merges `remote_head` of `with`
    pub fn set_merge_marker(&self, with: &str, remote_head: Hash) -> Result<()> {
        let mut status = self.status()?;
        status.set_merge_marker(with, remote_head);
        self.save_status(&mut status)
    }

    /// Finalize the staging tree into a new commit and return it.
    ///
    /// Fails with `NoChange` if nothing was staged since HEAD.
    #[instrument(skip(self), fields(author = %author))]
    pub fn make_commit(&self, author: &str, message: &str) -> Result<Commit> {
        let start = Instant::now();
        let commit = self.atomic_with_batch(|batch| self.make_commit_in(batch, author, message))?;

        info!(
            commit = %commit.tree_hash().short(),
            index = commit.index(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Created commit"
        );
        Ok(commit)
    }

    fn make_commit_in(&self, batch: &Batch<'_>, author: &str, message: &str) -> Result<Commit> {
        let head = self.head_opt()?;
        let mut status = self.status()?;

        if let Some(head) = &head {
            if status.root() == head.root() {
                return Err(CatfsError::NoChange);
            }
        }

        // Only nodes reachable from the root end up in the object store.
        let root = self.root()?;
        let mut exported = HashSet::new();
        walk(self, &Node::Directory(root), true, &mut |child| {
            batch.put(&object_key(&child.tree_hash()), child.marshal()?);
            batch.put(&tree_key("tree", child), child.tree_hash().to_hex());
            exported.insert(child.inode());
            Ok(WalkControl::Continue)
        })?;
        debug!(exported = exported.len(), "Exported staged nodes");

        status.set_parent(head.as_ref().map(|h| h.tree_hash()));
        status.box_commit(author, message);

        let hex = status.tree_hash().to_hex();
        let commit_node = Node::Commit(status.clone());
        batch.put(&object_key(&status.tree_hash()), commit_node.marshal()?);
        batch.put(&format!("index/{}", status.index()), hex);
        self.save_ref("head", &commit_node)?;

        match self.resolve_ref("init") {
            Ok(_) => {}
            Err(err) if err.is_no_such_ref() => self.save_ref("init", &commit_node)?,
            Err(err) => return Err(err),
        }

        self.commit_move_mapping(&status, &mut exported)?;
        self.clear_stage(batch)?;

        let mut next = Commit::new(self.next_inode()?, status.index() + 1);
        next.set_root(status.root());
        next.set_parent(Some(status.tree_hash()));
        self.save_status(&mut next)?;
        Ok(status)
    }

    fn clear_stage(&self, batch: &Batch<'_>) -> Result<()> {
        // Cached versions that never made it into the object store would
        // otherwise stay resolvable in this process only.
        for key in self.kv.keys("stage/objects")? {
            let Some(hash) = key.rsplit('/').next().and_then(Hash::from_hex) else {
                continue;
            };

            if !self.kv.contains(&object_key(&hash))? {
                self.mem_index_forget(&hash);
            }
        }

        for prefix in ["stage/objects", "stage/tree", "stage/moves"] {
            batch.clear(prefix)?;
        }

        Ok(())
    }

    /// True if the staging tree differs from HEAD (or there is no HEAD yet)
    pub fn have_staged_changes(&self) -> Result<bool> {
        let Some(head) = self.head_opt()? else {
            return Ok(true);
        };

        Ok(self.status()?.root() != head.root())
    }

    /// Reset the whole staging tree to the state of `cmt`.
    ///
    /// Refuses with `StageNotEmpty` if there are staged changes, unless `force`.
    #[instrument(skip(self, cmt), fields(commit = %cmt.tree_hash().short(), force))]
    pub fn checkout_commit(&self, cmt: &Commit, force: bool) -> Result<()> {
        if !force && self.have_staged_changes()? {
            return Err(CatfsError::StageNotEmpty);
        }

        let mut status = self.status()?;
        let root = self
            .directory_by_hash(&cmt.root())?
            .ok_or(CatfsError::NoSuchHash(cmt.root()))?;

        self.atomic_with_batch(|batch| {
            self.mem_index_clear();
            batch.clear("stage/tree")?;
            batch.clear("stage/moves")?;
            self.mem_set_root(root);

            status.set_root(cmt.root());
            self.save_status(&mut status)
        })?;

        info!("Checked out commit");
        Ok(())
    }

    /// Commit number `index`; the staging commit has the highest index
    pub fn commit_by_index(&self, index: u64) -> Result<Commit> {
        let status = self.status()?;
        if status.index() == index {
            return Ok(status);
        }

        let Some(raw) = self.kv.get(&format!("index/{}", index))? else {
            return Err(CatfsError::NoSuchCommitIndex(index));
        };

        let hash = decode_hash(&raw)?;
        self.commit_by_hash(&hash)?.ok_or(CatfsError::NoSuchHash(hash))
    }

    ///////////////////////////
    // METADATA              //
    ///////////////////////////

    pub fn metadata_put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.atomic_with_batch(|batch| {
            batch.put(&format!("metadata/{}", key), value.to_vec());
            Ok(())
        })
    }

    pub fn metadata_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.get(&format!("metadata/{}", key))?)
    }

    /// Name of the principal owning this linker (empty if unset)
    pub fn owner(&self) -> Result<String> {
        if let Some(owner) = self.owner.lock().as_ref() {
            return Ok(owner.clone());
        }

        let owner = self
            .metadata_get("owner")?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .unwrap_or_default();
        *self.owner.lock() = Some(owner.clone());
        Ok(owner)
    }

    pub fn set_owner(&self, owner: &str) -> Result<()> {
        self.metadata_put("owner", owner.as_bytes())?;
        *self.owner.lock() = Some(owner.to_string());
        Ok(())
    }

    ///////////////////////////
    // REFS                  //
    ///////////////////////////

    /// Resolve a symbolic name to a node (usually a commit).
    ///
    /// Names are case-insensitive. `curr`/`status` name the staging commit.
    /// Each trailing `^` walks one parent back. Full or abbreviated hex
    /// hashes are accepted as well.
    pub fn resolve_ref(&self, refname: &str) -> Result<Node> {
        let n_ups = refname.len() - refname.trim_end_matches('^').len();
        let name = refname.trim_end_matches('^').to_lowercase();

        let nd = if name == "curr" || name == "status" {
            Node::Commit(self.status()?)
        } else {
            let hash = match self.kv.get(&ref_key(&name))? {
                Some(raw) => decode_hash(&raw)?,
                None => self.hash_from_name(&name)?,
            };

            match self.load_status()? {
                Some(status) if status.tree_hash() == hash => Node::Commit(status),
                _ => self
                    .node_by_hash(&hash)?
                    .ok_or_else(|| CatfsError::NoSuchRef(name.clone()))?,
            }
        };

        let mut cmt = match nd {
            Node::Commit(cmt) => cmt,
            other => return Ok(other),
        };

        for _ in 0..n_ups {
            match cmt.parent_commit(self)? {
                Some(parent) => cmt = parent,
                None => {
                    warn!(refname = %refname, "ref is too far back; stopping at init");
                    break;
                }
            }
        }

        Ok(Node::Commit(cmt))
    }

    fn hash_from_name(&self, name: &str) -> Result<Hash> {
        if let Some(hash) = Hash::from_hex(name) {
            return Ok(hash);
        }

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CatfsError::NoSuchRef(name.to_string()));
        }

        match self.expand_abbrev(name) {
            Ok(hash) => Ok(hash),
            Err(CatfsError::AmbiguousRev(rev)) => Err(CatfsError::AmbiguousRev(rev)),
            Err(_) => Err(CatfsError::NoSuchRef(name.to_string())),
        }
    }

    /// Like [`Linker::resolve_ref`] but insists on a commit
    pub fn resolve_commit(&self, refname: &str) -> Result<Commit> {
        self.resolve_ref(refname)?.into_commit()
    }

    pub fn save_ref(&self, refname: &str, nd: &Node) -> Result<()> {
        self.atomic_with_batch(|batch| {
            batch.put(&ref_key(refname), nd.tree_hash().to_hex());
            Ok(())
        })
    }

    pub fn list_refs(&self) -> Result<Vec<String>> {
        Ok(self
            .kv
            .keys("refs")?
            .into_iter()
            .filter_map(|key| key.strip_prefix("refs/").map(|name| name.to_string()))
            .collect())
    }

    pub fn remove_ref(&self, refname: &str) -> Result<()> {
        self.atomic_with_batch(|batch| {
            batch.erase(&ref_key(refname));
            Ok(())
        })
    }

    /// The most recent finalized commit
    pub fn head(&self) -> Result<Commit> {
        self.resolve_commit("head")
    }

    fn head_opt(&self) -> Result<Option<Commit>> {
        match self.head() {
            Ok(head) => Ok(Some(head)),
            Err(err) if err.is_no_such_ref() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Expand a hex prefix to the one object hash starting with it
    pub fn expand_abbrev(&self, abbrev: &str) -> Result<Hash> {
        let abbrev = abbrev.to_lowercase();
        if let Some(status) = self.load_status()? {
            if status.tree_hash().to_hex().starts_with(&abbrev) {
                return Ok(status.tree_hash());
            }
        }

        for prefix in ["stage/objects", "objects"] {
            let matches = self.kv.glob(&format!("{}/{}", prefix, abbrev))?;
            match matches.as_slice() {
                [] => continue,
                [single] => {
                    let hex = single.rsplit('/').next().unwrap_or_default();
                    return Hash::from_hex(hex)
                        .ok_or_else(|| CatfsError::BadNode(format!("invalid object key {}", single)));
                }
                _ => return Err(CatfsError::AmbiguousRev(abbrev)),
            }
        }

        Err(CatfsError::NoSuchRef(abbrev))
    }

    ///////////////////////////
    // STATUS & ROOT         //
    ///////////////////////////

    /// The current root directory of the staging tree
    pub fn root(&self) -> Result<Directory> {
        if let Some(root) = self.index.lock().root.clone() {
            return Ok(root);
        }

        let status = self.status()?;
        let root = self
            .directory_by_hash(&status.root())?
            .ok_or(CatfsError::NoSuchHash(status.root()))?;
        self.mem_set_root(root.clone());
        Ok(root)
    }

    /// The staging commit, created on first use
    pub fn status(&self) -> Result<Commit> {
        self.atomic_with_batch(|batch| self.status_in(batch))
    }

    fn status_in(&self, batch: &Batch<'_>) -> Result<Commit> {
        if let Some(status) = self.load_status()? {
            return Ok(status);
        }

        let mut status = Commit::new(self.next_inode()?, 0);
        match self.head_opt()? {
            Some(head) => {
                status.set_parent(Some(head.tree_hash()));
                status.set_root(head.root());
            }
            None => {
                let root_hash = match self.resolve_directory("/")? {
                    Some(root) => root.tree_hash(),
                    None => {
                        let root = Directory::new_root(&self.owner()?, self.next_inode()?);
                        let root_hash = root.tree_hash();
                        self.stage_node_recursive(batch, &Node::Directory(root))?;
                        root_hash
                    }
                };

                status.set_root(root_hash);
            }
        }

        self.save_status(&mut status)?;
        Ok(status)
    }

    fn load_status(&self) -> Result<Option<Commit>> {
        match self.kv.get(STATUS_KEY)? {
            Some(data) => Node::unmarshal(&data)?.into_commit().map(Some),
            None => Ok(None),
        }
    }

    fn save_status(&self, status: &mut Commit) -> Result<()> {
        self.atomic_with_batch(|batch| {
            if let Some(head) = self.head_opt()? {
                status.set_parent(Some(head.tree_hash()));
            }

            status.box_commit(AUTHOR_OF_STAGE, "");
            let node = Node::Commit(status.clone());
            batch.put(STATUS_KEY, node.marshal()?);
            batch.put(&inode_key(status.inode()), status.tree_hash().to_hex());
            self.save_ref("curr", &node)
        })
    }

    ///////////////////////////
    // LOOKUP HELPERS        //
    ///////////////////////////

    /// Resolve `repo_path` from the current root. Removed paths yield their ghost.
    pub fn lookup_node(&self, repo_path: &str) -> Result<Node> {
        self.root()?.lookup(self, repo_path)
    }

    /// Resolve `repo_path` in the tree of `cmt`
    pub fn lookup_node_at(&self, cmt: &Commit, repo_path: &str) -> Result<Node> {
        let root = self
            .directory_by_hash(&cmt.root())?
            .ok_or(CatfsError::NoSuchHash(cmt.root()))?;
        root.lookup(self, repo_path)
    }

    /// Like [`Linker::lookup_node`] but only yields modifiable nodes
    pub fn lookup_mod_node(&self, repo_path: &str) -> Result<Node> {
        match self.lookup_node(repo_path)? {
            Node::Commit(_) => Err(CatfsError::bad_node(format!("{} is a commit", repo_path))),
            nd => Ok(nd),
        }
    }

    pub fn lookup_directory(&self, repo_path: &str) -> Result<Directory> {
        self.lookup_node(repo_path)?.into_directory()
    }

    pub fn lookup_file(&self, repo_path: &str) -> Result<File> {
        self.lookup_node(repo_path)?.into_file()
    }

    pub fn lookup_ghost(&self, repo_path: &str) -> Result<Ghost> {
        self.lookup_node(repo_path)?.into_ghost()
    }

    pub fn directory_by_hash(&self, hash: &Hash) -> Result<Option<Directory>> {
        match self.node_by_hash(hash)? {
            Some(nd) => nd.into_directory().map(Some),
            None => Ok(None),
        }
    }

    pub fn file_by_hash(&self, hash: &Hash) -> Result<Option<File>> {
        match self.node_by_hash(hash)? {
            Some(nd) => nd.into_file().map(Some),
            None => Ok(None),
        }
    }

    pub fn commit_by_hash(&self, hash: &Hash) -> Result<Option<Commit>> {
        if let Some(status) = self.load_status()? {
            if status.tree_hash() == *hash {
                return Ok(Some(status));
            }
        }

        match self.node_by_hash(hash)? {
            Some(nd) => nd.into_commit().map(Some),
            None => Ok(None),
        }
    }

    /// Visit every distinct node version from `from` (default: staging
    /// commit) back to `to` (default: the first commit), inclusive.
    pub fn iter_all<F>(&self, from: Option<Commit>, to: Option<&Commit>, mut visit: F) -> Result<()>
    where
        F: FnMut(&Node, &Commit) -> Result<()>,
    {
        let mut visited: HashSet<Hash> = HashSet::new();
        let mut curr = match from {
            Some(cmt) => cmt,
            None => self.status()?,
        };

        loop {
            let root = self
                .directory_by_hash(&curr.root())?
                .ok_or(CatfsError::NoSuchHash(curr.root()))?;

            walk(self, &Node::Directory(root), false, &mut |child| {
                if !visited.insert(child.tree_hash()) {
                    return Ok(WalkControl::SkipChildren);
                }

                visit(child, &curr)?;
                Ok(WalkControl::Continue)
            })?;

            if let Some(to) = to {
                if to.tree_hash() == curr.tree_hash() {
                    return Ok(());
                }
            }

            match curr.parent_commit(self)? {
                Some(parent) => curr = parent,
                None => return Ok(()),
            }
        }
    }

    ///////////////////////////
    // TRANSACTIONS          //
    ///////////////////////////

    /// Run `f` without direct access to the batch; see [`Linker::atomic_with_batch`]
    pub fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.atomic_with_batch(|_| f())
    }

    /// Run `f` inside one (possibly nested) batch.
    ///
    /// On error every write of the transaction is rolled back and, if
    /// anything had been written, the memory index is dropped so it gets
    /// reloaded from the unchanged store.
    pub fn atomic_with_batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Batch<'_>) -> Result<T>,
    {
        let batch = self.kv.batch();
        match f(&batch) {
            Ok(value) => {
                if let Err(err) = batch.flush() {
                    self.mem_index_clear();
                    warn!(error = %err, "Flush to database failed, resetting memory index");
                    return Err(err.into());
                }

                Ok(value)
            }
            Err(err) => {
                let had_writes = batch.have_writes();
                batch.rollback();
                if had_writes {
                    self.mem_index_clear();
                    warn!(error = %err, "Rolled back due to error");
                }

                Err(err)
            }
        }
    }
}

impl NodeLinker for Linker {
    fn node_by_hash(&self, hash: &Hash) -> Result<Option<Node>> {
        Linker::node_by_hash(self, hash)
    }

    fn lookup_node(&self, path: &str) -> Result<Node> {
        Linker::lookup_node(self, path)
    }

    fn mem_index_add(&self, nd: &Node) {
        self.mem_add(nd, true);
    }

    fn mem_index_swap(&self, nd: &Node, old_hash: &Hash) {
        if let Node::Directory(dir) = nd {
            if dir.is_root() {
                self.index.lock().by_hash.remove(old_hash);
                self.mem_set_root(dir.clone());
                return;
            }
        }

        // Detached nodes are not linked at their path yet; only refresh
        // path entries that already belong to the same inode.
        let mut index = self.index.lock();
        index.by_hash.remove(old_hash);
        index.by_hash.insert(nd.tree_hash(), nd.clone());

        let node_path = nd.path();
        if let Some(existing) = index.by_path.get_mut(&node_path) {
            if existing.inode() == nd.inode() {
                *existing = nd.clone();
            }
        }
    }

    fn mem_index_purge(&self, nd: &Node) {
        let mut index = self.index.lock();
        index.by_hash.remove(&nd.tree_hash());
        index.by_path.remove(&nd.path());
    }
}
