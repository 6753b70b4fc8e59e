//! Walking the history of a single node
//!
//! The walker starts at a node in some commit and follows it backwards
//! through the parent commits. Moves are followed through the move ledger,
//! including moves of any parent directory.

use crate::error::{CatfsError, Result};
use crate::linker::{Linker, MoveDir};
use crate::nodes::{path, Commit, Directory, Node};
use crate::vcs::change::{Change, ChangeType};
use tracing::trace;

/// Mask describing how `older` became `newer`
pub(crate) fn mask_between(older: &Node, newer: Option<&Node>) -> ChangeType {
    let Some(newer) = newer else {
        return ChangeType::NONE;
    };

    let mut mask = ChangeType::NONE;
    if older.content_hash() != newer.content_hash() {
        mask |= ChangeType::MODIFY;
    }

    if older.path() != newer.path() {
        mask |= ChangeType::MOVE;
    } else {
        match (older.is_ghost(), newer.is_ghost()) {
            (false, true) => mask |= ChangeType::REMOVE,
            (true, false) => mask |= ChangeType::ADD,
            _ => {}
        }
    }

    mask
}

fn parent_directory_at(lkr: &Linker, head: &Commit, child_path: &str) -> Result<Option<Directory>> {
    let dir_path = path::dirname(child_path);
    if dir_path == "/" {
        return Ok(None);
    }

    match lkr.lookup_node_at(head, &dir_path) {
        Ok(Node::Directory(dir)) => Ok(Some(dir)),
        Ok(other) => Err(CatfsError::bad_node(format!(
            "parent of {} is a {}",
            child_path,
            other.node_type()
        ))),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Find the other half of a move `curr` took part in at `head`.
///
/// Moving a directory only leaves a ghost for the directory itself, so the
/// parents of `curr` are checked as well. If one of them was moved, the
/// partner is looked up below the directory's old version.
pub(crate) fn find_move_partner(
    lkr: &Linker,
    head: &Commit,
    curr: &Node,
) -> Result<Option<(Node, MoveDir)>> {
    if let Some(found) = lkr.move_mapping(Some(head), curr)? {
        return Ok(Some(found));
    }

    let mut child_path = vec![curr.name().to_string()];
    let mut curr_path = curr.path();

    while let Some(parent) = parent_directory_at(lkr, head, &curr_path)? {
        curr_path = parent.path();

        let parent_node = Node::Directory(parent);
        let Some((prev, direction)) = lkr.move_mapping(Some(head), &parent_node)? else {
            child_path.insert(0, parent_node.name().to_string());
            continue;
        };

        let prev_dir = match prev {
            Node::Directory(dir) => dir,
            Node::Ghost(ghost) => ghost.old_directory()?,
            other => {
                return Err(CatfsError::bad_node(format!(
                    "move partner of directory {} is a {}",
                    curr_path,
                    other.node_type()
                )))
            }
        };

        return match prev_dir.lookup(lkr, &child_path.join("/")) {
            Ok(child) => Ok(Some((child, direction))),
            Err(err) if err.is_no_such_file() => Ok(None),
            Err(err) => Err(err),
        };
    }

    Ok(None)
}

enum Step {
    /// Emit the state of `curr` at `head`
    Node,
    /// Emit the final add of `curr` and stop
    Added,
    Done,
}

/// Iterates over all states a node had, most recent first.
///
/// Modeled after a scanner: call [`HistoryWalker::advance`] until it returns
/// false, then check [`HistoryWalker::err`]. The walker also implements
/// `Iterator`, yielding `Result<Change>`.
///
/// ```rust
/// use catfs::linker::{coreutils, Linker};
/// use catfs::nodes::hasher;
/// use catfs::store::Database;
/// use catfs::vcs::HistoryWalker;
/// use std::sync::Arc;
///
/// # fn main() -> catfs::Result<()> {
/// let lkr = Linker::new(Arc::new(Database::memory()));
/// lkr.set_owner("alice")?;
/// lkr.make_commit("alice", "init")?;
///
/// let content = hasher::content_hash(b"hello");
/// coreutils::stage(&lkr, "/hello.txt", content, content, 5, Vec::new())?;
/// let head = lkr.make_commit("alice", "add hello")?;
///
/// let node = lkr.lookup_node("/hello.txt")?;
/// let mut walker = HistoryWalker::new(&lkr, head, node);
/// while walker.advance() {
///     if let Some(state) = walker.state() {
///         println!("{}", state);
///     }
/// }
///
/// if let Some(err) = walker.err() {
///     eprintln!("history walk failed: {}", err);
/// }
/// # Ok(())
/// # }
/// ```
pub struct HistoryWalker<'a> {
    lkr: &'a Linker,
    head: Commit,
    curr: Node,
    newer: Option<Node>,
    step: Step,
    state: Option<Change>,
    err: Option<CatfsError>,
}

impl<'a> HistoryWalker<'a> {
    /// Walk the history of `node` as it is found in `head`.
    /// It is not checked that `node` really is part of `head`.
    pub fn new(lkr: &'a Linker, head: Commit, node: Node) -> Self {
        Self {
            lkr,
            head,
            curr: node,
            newer: None,
            step: Step::Node,
            state: None,
            err: None,
        }
    }

    /// Step to the next (older) state. Returns false when the history is
    /// exhausted or an error happened.
    pub fn advance(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }

        match self.step {
            Step::Done => false,
            Step::Added => {
                self.state = Some(Change {
                    mask: ChangeType::ADD,
                    head: self.head.clone(),
                    next: None,
                    curr: self.curr.clone(),
                    moved_to: None,
                    was_previously_at: None,
                });
                self.step = Step::Done;
                true
            }
            Step::Node => match self.step_node() {
                Ok(change) => {
                    self.state = Some(change);
                    true
                }
                Err(err) => {
                    self.err = Some(err);
                    self.step = Step::Done;
                    false
                }
            },
        }
    }

    fn step_node(&mut self) -> Result<Change> {
        let mut change = Change {
            mask: mask_between(&self.curr, self.newer.as_ref()),
            head: self.head.clone(),
            next: None,
            curr: self.curr.clone(),
            moved_to: None,
            was_previously_at: None,
        };

        let partner = find_move_partner(self.lkr, &self.head, &self.curr)?;
        let Some(parent) = self.head.parent_commit(self.lkr)? else {
            self.step = Step::Added;
            return Ok(change);
        };

        change.next = Some(parent.clone());

        let prev = match &partner {
            Some((moved_from, MoveDir::SrcToDst)) => {
                change.was_previously_at = Some(moved_from.path());
                match moved_from {
                    Node::Ghost(ghost) => ghost.old_node().clone(),
                    other => other.clone(),
                }
            }
            _ => match self.lkr.lookup_node_at(&parent, &self.curr.path()) {
                Ok(prev) => prev,
                Err(err) if err.is_no_such_file() => {
                    // Did not exist before, so it was added in `head`.
                    self.step = Step::Added;
                    return Ok(change);
                }
                Err(err) => return Err(err),
            },
        };

        if let Some((moved_to, MoveDir::DstToSrc)) = &partner {
            if self.curr.is_ghost() {
                change.moved_to = Some(moved_to.path());
            }
        }

        trace!(
            head = %self.head.tree_hash().short(),
            path = %self.curr.path(),
            mask = %change.mask,
            "History step"
        );

        self.newer = Some(std::mem::replace(&mut self.curr, prev));
        self.head = parent;
        Ok(change)
    }

    /// The state reached by the last successful [`HistoryWalker::advance`]
    pub fn state(&self) -> Option<&Change> {
        self.state.as_ref()
    }

    pub fn err(&self) -> Option<&CatfsError> {
        self.err.as_ref()
    }
}

impl Iterator for HistoryWalker<'_> {
    type Item = Result<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            return self.state.clone().map(Ok);
        }

        self.err.take().map(Err)
    }
}

/// Collect the states of `nd` from `start` back to `stop` (inclusive).
/// Without `stop` the whole history is returned.
///
/// Each mask describes how a state became the next more recent one, so the
/// newest state always carries `NONE` and the oldest one `ADD`. A file added,
/// modified and then moved yields `[NONE, MOVE, MODIFY, ADD]`.
pub fn history(lkr: &Linker, nd: &Node, start: &Commit, stop: Option<&Commit>) -> Result<Vec<Change>> {
    let mut states = Vec::new();
    let mut walker = HistoryWalker::new(lkr, start.clone(), nd.clone());

    while walker.advance() {
        let Some(state) = walker.state() else {
            break;
        };

        let reached_stop = stop.is_some_and(|stop| stop.tree_hash() == state.head.tree_hash());
        states.push(state.clone());
        if reached_stop {
            break;
        }
    }

    if let Some(err) = walker.err.take() {
        return Err(err);
    }

    Ok(states)
}
