//! Change masks and single node changes

use crate::error::{CatfsError, Result};
use crate::linker::{coreutils, Linker};
use crate::nodes::{path, Commit, Node};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use tracing::debug;

/// Set of things that happened to a node between two states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeType(u8);

impl ChangeType {
    pub const NONE: ChangeType = ChangeType(0);
    pub const ADD: ChangeType = ChangeType(1);
    pub const MODIFY: ChangeType = ChangeType(2);
    pub const MOVE: ChangeType = ChangeType(4);
    pub const REMOVE: ChangeType = ChangeType(8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> ChangeType {
        ChangeType(bits & 0x0f)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// True if all bits of `other` are set
    pub fn contains(self, other: ChangeType) -> bool {
        self.0 & other.0 == other.0 && !other.is_none()
    }

    /// True if any bit of `other` is set
    pub fn intersects(self, other: ChangeType) -> bool {
        self.0 & other.0 != 0
    }

    /// Two masks are compatible unless both sides touched the content.
    ///
    /// ```text
    ///   |  a  c  r  m
    /// --+------------
    /// a |  n  n  y  y
    /// c |  n  n  y  y
    /// r |  y  y  y  y
    /// m |  y  y  y  y
    /// ```
    pub fn is_compatible(self, other: ChangeType) -> bool {
        let content = ChangeType::ADD | ChangeType::MODIFY;
        !(self.intersects(content) && other.intersects(content))
    }
}

impl BitOr for ChangeType {
    type Output = ChangeType;

    fn bitor(self, rhs: ChangeType) -> ChangeType {
        ChangeType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeType {
    fn bitor_assign(&mut self, rhs: ChangeType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ChangeType {
    type Output = ChangeType;

    fn bitand(self, rhs: ChangeType) -> ChangeType {
        ChangeType(self.0 & rhs.0)
    }
}

impl Not for ChangeType {
    type Output = ChangeType;

    fn not(self) -> ChangeType {
        ChangeType(!self.0 & 0x0f)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (ChangeType::ADD, "added"),
            (ChangeType::MODIFY, "modified"),
            (ChangeType::MOVE, "moved"),
            (ChangeType::REMOVE, "removed"),
        ];

        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.intersects(*bit))
            .map(|(_, name)| *name)
            .collect();

        if set.is_empty() {
            return f.write_str("none");
        }

        f.write_str(&set.join("|"))
    }
}

/// One state of a node in its history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// What happened between this state and the more recent one
    pub mask: ChangeType,
    /// Commit this state was seen in
    pub head: Commit,
    /// Commit before `head`, if any
    pub next: Option<Commit>,
    /// The node as it was in `head`
    pub curr: Node,
    /// Set on ghosts that were left behind by a move: where the node went
    pub moved_to: Option<String>,
    /// Set on nodes that arrived via a move: where they came from
    pub was_previously_at: Option<String>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}", self.curr.path(), self.mask)?;
        if let Some(prev) = &self.was_previously_at {
            write!(f, " (was {})", prev)?;
        }

        if let Some(to) = &self.moved_to {
            write!(f, " (now {})", to)?;
        }

        f.write_str(">")
    }
}

fn lookup_optional(lkr: &Linker, repo_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_mod_node(repo_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Create `nd` (a file or an empty directory) in the staging tree of `lkr`
fn replay_add(lkr: &Linker, nd: &Node) -> Result<()> {
    match nd {
        Node::File(file) => {
            coreutils::mkdir(lkr, &path::dirname(&file.path()), true)?;
            coreutils::stage_from_file_node(lkr, file)?;
        }
        Node::Directory(dir) => {
            coreutils::mkdir(lkr, &dir.path(), true)?;
        }
        other => {
            return Err(CatfsError::bad_node(format!(
                "cannot replay an add of a {}",
                other.node_type()
            )))
        }
    }

    Ok(())
}

impl Change {
    /// Redo this change in the staging tree of `lkr`: add or modify first,
    /// then move, then remove. Nothing is committed.
    pub fn replay(&self, lkr: &Linker) -> Result<()> {
        lkr.atomic(|| {
            if self.mask.intersects(ChangeType::ADD | ChangeType::MODIFY) {
                self.replay_add_with_unpacking(lkr)?;
            }

            if self.mask.intersects(ChangeType::MOVE) {
                self.replay_move(lkr)?;
            }

            // Without a ghost the node was removed and added again.
            if self.mask.intersects(ChangeType::REMOVE) && self.curr.is_ghost() {
                self.replay_remove(lkr)?;
            }

            debug!(change = %self, "Replayed change");
            Ok(())
        })
    }

    /// Ghosts are added as the node they replaced; the remove bit takes
    /// care of them right after.
    fn replay_add_with_unpacking(&self, lkr: &Linker) -> Result<()> {
        let curr = match &self.curr {
            Node::Ghost(ghost) => ghost.old_node().clone(),
            other => other.clone(),
        };

        if let Some(existing) = lookup_optional(lkr, &curr.path())? {
            if existing.node_type() != curr.node_type() && !existing.is_ghost() {
                coreutils::remove(lkr, &existing, true, true)?;
            }
        }

        replay_add(lkr, &curr)
    }

    fn replay_move(&self, lkr: &Linker) -> Result<()> {
        if let Some(moved_to) = &self.moved_to {
            let existing = lookup_optional(lkr, &self.curr.path())?;
            coreutils::mkdir(lkr, &path::dirname(moved_to), true)?;

            if let Some(existing) = existing.filter(|nd| !nd.is_ghost()) {
                if lookup_optional(lkr, moved_to)?.is_none() {
                    coreutils::move_node(lkr, &existing, moved_to)?;
                }
            }
        }

        if !self.curr.is_ghost() && lookup_optional(lkr, &self.curr.path())?.is_none() {
            replay_add(lkr, &self.curr)?;
        }

        let Some(prev_path) = self.was_previously_at.as_ref().filter(|_| !self.curr.is_ghost()) else {
            return Ok(());
        };

        if let Some(prev) = lookup_optional(lkr, prev_path)? {
            if !prev.is_ghost() {
                coreutils::remove(lkr, &prev, true, true)?;
            }
        }

        // Remember the move, so the next sync sees it as one.
        let moved = lkr.lookup_mod_node(&self.curr.path())?;
        if let Some(ghost) = lookup_optional(lkr, prev_path)? {
            debug!(src = %prev_path, dst = %moved.path(), "Adding replayed move mapping");
            lkr.add_move_mapping(moved.inode(), ghost.inode())?;
        }

        Ok(())
    }

    fn replay_remove(&self, lkr: &Linker) -> Result<()> {
        let curr = lkr.lookup_mod_node(&self.curr.path())?;
        if !curr.is_ghost() {
            coreutils::remove(lkr, &curr, true, true)?;
        }

        Ok(())
    }
}

/// Fold a list of changes (most recent first) into a single, lossy change
pub fn combine_changes(changes: &[Change]) -> Option<Change> {
    let first = changes.first()?;
    let last = changes.last()?;

    let mut combined = Change {
        mask: ChangeType::NONE,
        head: first.head.clone(),
        next: first.next.clone(),
        curr: first.curr.clone(),
        moved_to: None,
        was_previously_at: None,
    };

    let first_path = first.curr.path();
    let mut path_changed = first_path != last.curr.path();
    let is_ghost = first.curr.is_ghost();

    for change in changes {
        combined.mask |= change.mask;
    }

    if combined.mask.intersects(ChangeType::MOVE) {
        combined.moved_to = changes.iter().rev().find_map(|ch| ch.moved_to.clone());

        if let Some(prev) = changes.iter().rev().find_map(|ch| ch.was_previously_at.clone()) {
            path_changed = prev != first_path;
            combined.was_previously_at = Some(prev);
        }
    }

    // Circular moves end where they started.
    if !path_changed && !is_ghost {
        combined.mask = combined.mask & !ChangeType::MOVE;
    }

    if !first.mask.intersects(ChangeType::REMOVE) && !is_ghost {
        combined.mask = combined.mask & !ChangeType::REMOVE;
    }

    Some(combined)
}
