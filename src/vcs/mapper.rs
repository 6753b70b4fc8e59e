//! Pairing nodes of two trees
//!
//! The mapper walks a source tree and finds, for every node, the node in the
//! destination tree it corresponds to. Equal subtrees are skipped by their
//! content hash. Moves on either side are detected through the ghosts they
//! left behind. Source is the remote side, destination is our own.

use crate::error::{CatfsError, Result};
use crate::linker::{Linker, MoveDir};
use crate::nodes::{path, walk, Commit, Directory, File, Node, WalkControl};
use crate::trie::Trie;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, instrument};

/// Two corresponding nodes. At most one side is missing.
///
/// A missing `src` means the node only exists on our side: either it was
/// removed remotely (`src_was_removed`) or the remote never had it. A
/// missing `dst` means the node is new on the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPair {
    pub src: Option<Node>,
    pub dst: Option<Node>,
    pub src_was_removed: bool,
    /// Both nodes have the same content, only the path differs
    pub src_was_moved: bool,
    /// One side is a file, the other a directory
    pub type_mismatch: bool,
}

impl fmt::Display for MapPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |nd: &Option<Node>| match nd {
            Some(nd) => nd.path(),
            None => "-".to_string(),
        };

        write!(f, "{} <-> {}", describe(&self.src), describe(&self.dst))?;
        if self.src_was_removed {
            f.write_str(" (removed)")?;
        }
        if self.src_was_moved {
            f.write_str(" (moved)")?;
        }
        if self.type_mismatch {
            f.write_str(" (type mismatch)")?;
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Mark {
    visited: bool,
    handled: bool,
}

fn mark_path(marks: &mut Trie<Mark>, node_path: &str, update: impl FnOnce(&mut Mark)) {
    if let Some(mark) = marks.get_mut(node_path) {
        update(mark);
        return;
    }

    let mut mark = Mark::default();
    update(&mut mark);
    marks.insert(node_path, mark);
}

fn lookup_optional_at(lkr: &Linker, head: &Commit, node_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_node_at(head, node_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Follow the ghost `nd` to the node it was moved to, as visible in `head`.
///
/// Returns `None` if the ghost stems from a plain remove, or if the target
/// is gone or was replaced by a different node (another inode) since.
pub fn ghost_to_alive(lkr: &Linker, head: &Commit, nd: &Node) -> Result<Option<Node>> {
    let mut seen = HashSet::new();
    let mut curr = nd.clone();

    loop {
        if !seen.insert(curr.inode()) {
            debug!(path = %nd.path(), "Move chain loops, giving up");
            return Ok(None);
        }

        let Some((partner, direction)) = lkr.move_entry_point(&curr)? else {
            return Ok(None);
        };

        // Ghosts only ever point forward.
        if direction != MoveDir::DstToSrc {
            return Ok(None);
        }

        let most_recent = lkr.node_by_inode(partner.inode())?.ok_or_else(|| {
            CatfsError::bad_node(format!("no node with inode {}", partner.inode()))
        })?;

        if most_recent.is_ghost() {
            curr = most_recent;
            continue;
        }

        let Some(reachable) = lookup_optional_at(lkr, head, &most_recent.path())? else {
            return Ok(None);
        };

        if reachable.inode() != most_recent.inode() {
            return Ok(None);
        }

        return Ok(Some(reachable));
    }
}

pub struct Mapper<'a> {
    lkr_src: &'a Linker,
    lkr_dst: &'a Linker,
    src_head: Commit,
    dst_head: Commit,
    src_root: Node,
    src_marks: Trie<Mark>,
    dst_marks: Trie<Mark>,
    pairs: Vec<MapPair>,
}

impl<'a> Mapper<'a> {
    /// Map everything below `src_root` onto `lkr_dst`.
    /// Heads default to the respective HEAD commits.
    pub fn new(
        lkr_src: &'a Linker,
        lkr_dst: &'a Linker,
        src_head: Option<Commit>,
        dst_head: Option<Commit>,
        src_root: Node,
    ) -> Result<Self> {
        let src_head = match src_head {
            Some(head) => head,
            None => lkr_src.head()?,
        };

        let dst_head = match dst_head {
            Some(head) => head,
            None => lkr_dst.head()?,
        };

        Ok(Self {
            lkr_src,
            lkr_dst,
            src_head,
            dst_head,
            src_root,
            src_marks: Trie::new(),
            dst_marks: Trie::new(),
            pairs: Vec::new(),
        })
    }

    fn is_src_visited(&self, src_path: &str) -> bool {
        self.src_marks.get(src_path).is_some_and(|m| m.visited)
    }

    fn set_src_visited(&mut self, src_path: &str) {
        mark_path(&mut self.src_marks, src_path, |m| m.visited = true);
    }

    fn set_handled(&mut self, src: Option<&Node>, dst: Option<&Node>) {
        if let Some(src) = src {
            mark_path(&mut self.src_marks, &src.path(), |m| m.handled = true);
        }

        if let Some(dst) = dst {
            mark_path(&mut self.dst_marks, &dst.path(), |m| m.handled = true);
        }
    }

    fn report(
        &mut self,
        src: Option<Node>,
        dst: Option<Node>,
        type_mismatch: bool,
        src_was_removed: bool,
        src_was_moved: bool,
    ) {
        self.set_handled(src.as_ref(), dst.as_ref());

        let pair = MapPair {
            src,
            dst,
            src_was_removed,
            src_was_moved,
            type_mismatch,
        };

        debug!(pair = %pair, "Mapped pair");
        self.pairs.push(pair);
    }

    fn map_file(&mut self, src_file: &File, dst_path: &str) -> Result<()> {
        let src_path = src_file.path();
        if self.is_src_visited(&src_path) {
            return Ok(());
        }

        self.set_src_visited(&src_path);
        let src = Node::File(src_file.clone());

        let Some(dst) = lookup_optional_at(self.lkr_dst, &self.dst_head, dst_path)? else {
            self.report(Some(src), None, false, false, false);
            return Ok(());
        };

        match dst {
            Node::Directory(_) => self.report(Some(src), Some(dst), true, false, false),
            Node::File(ref dst_file) => {
                if dst_file.content_hash() == src_file.content_hash() {
                    self.set_handled(Some(&src), Some(&dst));
                    if src_path != dst_file.path() {
                        self.report(Some(src), Some(dst), false, false, true);
                    }

                    return Ok(());
                }

                self.report(Some(src), Some(dst), false, false, false);
            }
            Node::Ghost(_) => {
                // Maybe we moved it away on our side.
                let alive = ghost_to_alive(self.lkr_dst, &self.dst_head, &dst)?;
                let mismatch = alive.as_ref().is_some_and(|nd| nd.as_file().is_none());
                self.report(Some(src), alive, mismatch, false, false);
            }
            Node::Commit(_) => {
                return Err(CatfsError::bad_node(format!("{} resolves to a commit", dst_path)))
            }
        }

        Ok(())
    }

    fn map_directory(&mut self, src_dir: &Directory, dst_path: &str, force: bool) -> Result<()> {
        let src_path = src_dir.path();
        if !force && self.is_src_visited(&src_path) {
            return Ok(());
        }

        self.set_src_visited(&src_path);
        let src = Node::Directory(src_dir.clone());

        let Some(dst) = lookup_optional_at(self.lkr_dst, &self.dst_head, dst_path)? else {
            self.report(Some(src), None, false, false, false);
            return Ok(());
        };

        let dst_dir = match dst {
            Node::Directory(dir) => dir,
            Node::Ghost(_) => {
                let Some(alive) = ghost_to_alive(self.lkr_dst, &self.dst_head, &dst)? else {
                    self.report(Some(src), None, false, false, false);
                    return Ok(());
                };

                // Follow our move only if the remote has nothing at its target.
                let alive_path = alive.path();
                return match lookup_optional_at(self.lkr_src, &self.src_head, &alive_path)? {
                    None | Some(Node::Ghost(_)) => self.map_directory(src_dir, &alive_path, true),
                    Some(_) => {
                        self.report(Some(src), None, false, false, false);
                        Ok(())
                    }
                };
            }
            other => {
                self.report(Some(src), Some(other), true, false, false);
                return Ok(());
            }
        };

        mark_path(&mut self.dst_marks, &dst_dir.path(), |m| m.visited = true);
        if dst_dir.content_hash() == src_dir.content_hash() {
            let dst = Node::Directory(dst_dir);
            self.set_handled(Some(&src), Some(&dst));
            if src_path != dst.path() {
                self.report(Some(src), Some(dst), false, false, true);
            }

            return Ok(());
        }

        let dst_dir_path = dst_dir.path();
        for child in src_dir.children_sorted(self.lkr_src)? {
            let child_dst_path = path::join(&dst_dir_path, child.name());
            match child {
                Node::Directory(dir) => self.map_directory(&dir, &child_dst_path, false)?,
                Node::File(file) => self.map_file(&file, &child_dst_path)?,
                Node::Ghost(_) => {}
                Node::Commit(_) => {
                    return Err(CatfsError::bad_node(format!(
                        "commit below directory {}",
                        src_path
                    )))
                }
            }
        }

        Ok(())
    }

    /// Resolve all ghosts of the source tree first: they tell which nodes
    /// were moved or removed remotely.
    fn handle_ghosts(&mut self) -> Result<()> {
        let mut ghosts = Vec::new();
        walk(self.lkr_src, &self.src_root, true, &mut |nd| {
            if nd.is_ghost() {
                ghosts.push(nd.clone());
            }
            Ok(WalkControl::Continue)
        })?;

        let mut moved_dirs = Vec::new();
        for ghost in ghosts {
            let ghost_path = ghost.path();
            self.set_src_visited(&ghost_path);
            let alive = ghost_to_alive(self.lkr_src, &self.src_head, &ghost)?;

            let Some(alive) = alive else {
                // Removed remotely. Only worth reporting if we still have it.
                if let Some(dst) = lookup_optional_at(self.lkr_dst, &self.dst_head, &ghost_path)? {
                    if !dst.is_ghost() {
                        self.report(None, Some(dst), false, true, false);
                    }
                }

                continue;
            };

            let alive_path = alive.path();
            if let Some(dst) = lookup_optional_at(self.lkr_dst, &self.dst_head, &alive_path)? {
                if !dst.is_ghost() {
                    // Something lives at the target already; the structural
                    // pass pairs it up as usual.
                    continue;
                }
            }

            let dst_ref = match lookup_optional_at(self.lkr_dst, &self.dst_head, &ghost_path)? {
                Some(dst_ghost @ Node::Ghost(_)) => {
                    ghost_to_alive(self.lkr_dst, &self.dst_head, &dst_ghost)?
                }
                other => other,
            };

            let Some(dst_ref) = dst_ref else {
                continue;
            };

            match alive {
                Node::File(_) => {
                    self.set_src_visited(&alive_path);

                    let mismatch = dst_ref.node_type() != alive.node_type();
                    let moved = !mismatch && dst_ref.content_hash() == alive.content_hash();
                    self.report(Some(alive), Some(dst_ref), mismatch, false, moved);
                }
                Node::Directory(dir) => {
                    if dst_ref.as_directory().is_none() {
                        self.report(Some(Node::Directory(dir)), Some(dst_ref), true, false, false);
                        continue;
                    }

                    moved_dirs.push((dir, dst_ref.path()));
                }
                other => {
                    return Err(CatfsError::bad_node(format!(
                        "ghost {} resolves to a {}",
                        ghost_path,
                        other.node_type()
                    )))
                }
            }
        }

        // Directories last: mapping them assumes the moved files inside are done.
        for (dir, dst_path) in moved_dirs {
            self.map_directory(&dir, &dst_path, false)?;
        }

        Ok(())
    }

    /// Report everything below `root` that no pair covered yet. A directory
    /// nothing below was touched in is reported once, as a unit.
    fn extract_leftovers(&mut self, root: &Directory, src_to_dst: bool) -> Result<()> {
        let lkr = if src_to_dst { self.lkr_src } else { self.lkr_dst };
        let marks = if src_to_dst { &self.src_marks } else { &self.dst_marks };
        if marks.get(&root.path()).is_some_and(|m| m.handled) {
            return Ok(());
        }

        for child in root.children_sorted(lkr)? {
            let marks = if src_to_dst { &self.src_marks } else { &self.dst_marks };
            let untouched = marks.subtree(&child.path()).is_empty();
            if marks.get(&child.path()).is_some_and(|m| m.handled) {
                continue;
            }

            match child {
                Node::Directory(dir) if !untouched => self.extract_leftovers(&dir, src_to_dst)?,
                Node::Directory(_) | Node::File(_) if src_to_dst => {
                    self.report(Some(child), None, false, false, false)
                }
                Node::Directory(_) | Node::File(_) => {
                    self.report(None, Some(child), false, false, false)
                }
                Node::Ghost(_) | Node::Commit(_) => {}
            }
        }

        Ok(())
    }

    /// Run the mapping and hand every pair to `visit`, in the order found
    #[instrument(skip(self, visit), fields(root = %self.src_root.path()))]
    pub fn map<F>(mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(MapPair) -> Result<()>,
    {
        self.handle_ghosts()?;

        match self.src_root.clone() {
            Node::Directory(src_root) => {
                self.map_directory(&src_root, &src_root.path(), false)?;
                self.extract_leftovers(&src_root, true)?;

                let dst_root = self
                    .lkr_dst
                    .directory_by_hash(&self.dst_head.root())?
                    .ok_or(CatfsError::NoSuchHash(self.dst_head.root()))?;
                self.extract_leftovers(&dst_root, false)?;
            }
            Node::File(file) => self.map_file(&file, &file.path())?,
            Node::Ghost(_) => {}
            Node::Commit(cmt) => {
                return Err(CatfsError::bad_node(format!(
                    "cannot map commit {}",
                    cmt.tree_hash().short()
                )))
            }
        }

        debug!(pairs = self.pairs.len(), "Mapping finished");
        for pair in self.pairs.drain(..) {
            visit(pair)?;
        }

        Ok(())
    }

    /// Convenience wrapper collecting all pairs
    pub fn collect(self) -> Result<Vec<MapPair>> {
        let mut pairs = Vec::new();
        self.map(|pair| {
            pairs.push(pair);
            Ok(())
        })?;
        Ok(pairs)
    }
}
