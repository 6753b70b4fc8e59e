//! Patches: the changes of a repository since some commit, in a form that
//! can be replayed onto another repository.
//!
//! A patch only holds leaf nodes (files and empty directories) and ghosts.
//! Intermediate directories take shape while the leaves are replayed.

use crate::error::Result;
use crate::linker::{Linker, MoveDir};
use crate::nodes::{path, walk, Commit, Node, WalkControl};
use crate::trie::Trie;
use crate::vcs::change::{combine_changes, Change, ChangeType};
use crate::vcs::history::history;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Index of the commit the patch starts at
    pub from_index: u64,
    /// Index of the staging commit the patch was made from
    pub curr_index: u64,
    /// Combined change per node, in replay order
    pub changes: Vec<Change>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Encode for transfer to another repository
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Patch> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Paths below any of `prefixes`; `/` (or no prefix at all) allows all
struct PrefixFilter {
    trie: Trie<()>,
}

impl PrefixFilter {
    fn new(prefixes: &[&str]) -> Self {
        let mut trie = Trie::new();
        if prefixes.is_empty() {
            trie.insert("/", ());
        }

        for prefix in prefixes {
            trie.insert(&path::clean(prefix), ());
        }

        Self { trie }
    }

    fn allows(&self, node_path: &str) -> bool {
        !self.trie.ancestors(node_path).is_empty()
    }
}

/// A ghost left by a move is replayed through the node that was moved, as
/// long as that node stays inside the prefixes. If it left them, the ghost
/// counts as a plain remove. Returns false if the change should be dropped.
fn filter_move_ghost(
    lkr: &Linker,
    nd: &Node,
    change: &mut Change,
    filter: &PrefixFilter,
) -> Result<bool> {
    if !nd.is_ghost() {
        return Ok(true);
    }

    let Some((target, MoveDir::DstToSrc)) = lkr.move_entry_point(nd)? else {
        return Ok(true);
    };

    if filter.allows(&target.path()) {
        return Ok(false);
    }

    change.mask = (change.mask & !ChangeType::MOVE) | ChangeType::REMOVE;
    change.moved_to = None;
    Ok(true)
}

/// Collect everything that changed in the staging tree of `lkr` since
/// `from`, limited to nodes whose parent is below one of `prefixes`.
#[instrument(skip(lkr, from), fields(from = %from.tree_hash().short()))]
pub fn make_patch(lkr: &Linker, from: &Commit, prefixes: &[&str]) -> Result<Patch> {
    let start = Instant::now();
    let status = lkr.status()?;

    let mut patch = Patch {
        from_index: from.index(),
        curr_index: status.index(),
        changes: Vec::new(),
    };

    if from.tree_hash() == status.tree_hash() {
        return Ok(patch);
    }

    let filter = PrefixFilter::new(prefixes);
    let root = lkr.root()?;

    walk(lkr, &Node::Directory(root), true, &mut |child| {
        let child_path = child.path();
        if child_path == "/" || !filter.allows(&path::dirname(&child_path)) {
            return Ok(WalkControl::Continue);
        }

        // Directories in between are shaped by their children.
        if let Node::Directory(dir) = child {
            if dir.n_children() > 0 {
                return Ok(WalkControl::Continue);
            }
        }

        let states = history(lkr, child, &status, Some(from))?;
        let Some(mut combined) = combine_changes(&states) else {
            return Ok(WalkControl::Continue);
        };

        if combined.mask.is_none() {
            return Ok(WalkControl::Continue);
        }

        if filter_move_ghost(lkr, child, &mut combined, &filter)? {
            debug!(change = %combined, "Adding change to patch");
            patch.changes.push(combined);
        }

        Ok(WalkControl::Continue)
    })?;

    // Ghosts last, older modifications first.
    patch.changes.sort_by(|a, b| {
        a.curr
            .is_ghost()
            .cmp(&b.curr.is_ghost())
            .then_with(|| a.curr.mod_time().cmp(&b.curr.mod_time()))
    });

    info!(
        changes = patch.changes.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Made patch"
    );
    Ok(patch)
}

/// Replay all changes of `patch` onto the staging tree of `lkr`, in one
/// transaction. Nothing is committed.
#[instrument(skip(lkr, patch), fields(changes = patch.changes.len()))]
pub fn apply_patch(lkr: &Linker, patch: &Patch) -> Result<()> {
    lkr.atomic(|| {
        for change in &patch.changes {
            change.replay(lkr)?;
        }

        Ok(())
    })
}
