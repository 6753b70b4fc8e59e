//! Deciding what to do with each mapped pair
//!
//! Source is the remote side, destination is our own. The resolver itself
//! never writes; an [`Executor`] carries out (or merely records) the
//! decision it takes for every pair.

use crate::error::{CatfsError, Result};
use crate::linker::Linker;
use crate::nodes::{path, Commit, Node};
use crate::vcs::change::ChangeType;
use crate::vcs::history::history;
use crate::vcs::mapper::{MapPair, Mapper};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Upper bound for the `<name>.conflict.<n>` counter
pub const MAX_CONFLICT_COPIES: usize = 100;

/// Receives the outcome of every decision
pub trait Executor {
    /// `src` does not exist on our side yet
    fn handle_add(&mut self, src: &Node) -> Result<()>;

    /// `dst` was removed on the remote side
    fn handle_remove(&mut self, dst: &Node) -> Result<()>;

    /// `dst` only exists on our side
    fn handle_missing(&mut self, dst: &Node) -> Result<()>;

    /// Same content, different paths
    fn handle_move(&mut self, src: &Node, dst: &Node) -> Result<()>;

    fn handle_merge(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()>;

    fn handle_conflict(
        &mut self,
        src: &Node,
        dst: &Node,
        src_mask: ChangeType,
        dst_mask: ChangeType,
    ) -> Result<()>;

    fn handle_type_conflict(&mut self, src: &Node, dst: &Node) -> Result<()>;

    /// A leftover of an earlier conflict; never resolved automatically
    fn handle_conflict_node(&mut self, nd: &Node) -> Result<()>;
}

/// Name of the `n`th conflict copy of a node called `name`
pub fn conflict_name(name: &str, n: usize) -> String {
    format!("{}.conflict.{}", name, n)
}

/// True for paths of the form `<name>.conflict.<n>`
pub fn is_conflict_path(node_path: &str) -> bool {
    let base = path::basename(node_path);
    match base.rsplit_once(".conflict.") {
        Some((name, n)) => !name.is_empty() && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

pub struct Resolver<'a> {
    lkr_src: &'a Linker,
    lkr_dst: &'a Linker,
    src_head: Commit,
    dst_head: Commit,
    src_merge_cmt: Option<Commit>,
    dst_merge_cmt: Option<Commit>,
}

impl<'a> Resolver<'a> {
    /// Heads default to the respective HEAD commits
    pub fn new(
        lkr_src: &'a Linker,
        lkr_dst: &'a Linker,
        src_head: Option<Commit>,
        dst_head: Option<Commit>,
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
            src_merge_cmt: None,
            dst_merge_cmt: None,
        })
    }

    pub fn src_head(&self) -> &Commit {
        &self.src_head
    }

    /// Map both trees and feed every pair's decision into `exec`
    #[instrument(skip(self, exec), fields(src_head = %self.src_head.tree_hash().short(), dst_head = %self.dst_head.tree_hash().short()))]
    pub fn resolve(&mut self, exec: &mut dyn Executor) -> Result<()> {
        let start = Instant::now();
        self.cache_last_common_merge()?;

        let src_root = self
            .lkr_src
            .directory_by_hash(&self.src_head.root())?
            .ok_or(CatfsError::NoSuchHash(self.src_head.root()))?;

        let mapper = Mapper::new(
            self.lkr_src,
            self.lkr_dst,
            Some(self.src_head.clone()),
            Some(self.dst_head.clone()),
            Node::Directory(src_root),
        )?;

        let pairs = mapper.collect()?;
        let n_pairs = pairs.len();
        for pair in pairs {
            self.decide(&pair, exec)?;
        }

        info!(
            pairs = n_pairs,
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved pairs"
        );
        Ok(())
    }

    /// Find the most recent commit on our side that merged with the remote
    fn cache_last_common_merge(&mut self) -> Result<()> {
        let src_owner = self.lkr_src.owner()?;
        self.src_merge_cmt = None;
        self.dst_merge_cmt = None;

        let mut curr = Some(self.dst_head.clone());
        while let Some(cmt) = curr {
            if let Some(marker) = cmt.merge_marker() {
                if marker.with == src_owner {
                    let src_cmt = self
                        .lkr_src
                        .commit_by_hash(&marker.head)?
                        .ok_or(CatfsError::NoSuchHash(marker.head))?;

                    debug!(
                        dst = %cmt.tree_hash().short(),
                        src = %src_cmt.tree_hash().short(),
                        "Found last common merge"
                    );
                    self.src_merge_cmt = Some(src_cmt);
                    self.dst_merge_cmt = Some(cmt);
                    return Ok(());
                }
            }

            curr = cmt.parent_commit(self.lkr_dst)?;
        }

        Ok(())
    }

    /// Check if `src` and `dst` changed independently since the last merge.
    ///
    /// Returns whether there is a conflict and the masks of all changes on
    /// either side since the most recent state both sides agree on. A side
    /// without changes yields `ChangeType::NONE`.
    pub fn has_conflicts(&self, src: &Node, dst: &Node) -> Result<(bool, ChangeType, ChangeType)> {
        let src_hist = history(self.lkr_src, src, &self.src_head, self.src_merge_cmt.as_ref())?;
        let dst_hist = history(self.lkr_dst, dst, &self.dst_head, self.dst_merge_cmt.as_ref())?;

        let mut common = None;
        'outer: for (src_idx, src_change) in src_hist.iter().enumerate() {
            if src_change.curr.is_ghost() {
                continue;
            }

            for (dst_idx, dst_change) in dst_hist.iter().enumerate() {
                if dst_change.curr.is_ghost() {
                    continue;
                }

                if src_change.curr.content_hash() == dst_change.curr.content_hash() {
                    common = Some((src_idx, dst_idx));
                    break 'outer;
                }
            }
        }

        let (src_changes, dst_changes) = match common {
            Some((src_idx, dst_idx)) => (&src_hist[..=src_idx], &dst_hist[..=dst_idx]),
            None => (&src_hist[..], &dst_hist[..]),
        };

        let src_mask = src_changes.iter().fold(ChangeType::NONE, |acc, ch| acc | ch.mask);
        let dst_mask = dst_changes.iter().fold(ChangeType::NONE, |acc, ch| acc | ch.mask);

        debug!(
            src = %src.path(),
            dst = %dst.path(),
            src_mask = %src_mask,
            dst_mask = %dst_mask,
            common = common.is_some(),
            "Compared histories"
        );

        // Only one side changed: the other one can simply follow.
        if src_mask.is_none() || dst_mask.is_none() {
            return Ok((false, src_mask, dst_mask));
        }

        Ok((!dst_mask.is_compatible(src_mask), src_mask, dst_mask))
    }

    /// True if the conflict copies of `dst` already carry the content of `src`
    fn has_conflict_copy(&self, src: &Node, dst: &Node) -> Result<bool> {
        let dir = path::dirname(&dst.path());
        for n in 0..MAX_CONFLICT_COPIES {
            let copy_path = path::join(&dir, &conflict_name(dst.name(), n));
            match self.lkr_dst.lookup_node_at(&self.dst_head, &copy_path) {
                Ok(Node::Ghost(_)) => continue,
                Ok(copy) if copy.content_hash() == src.content_hash() => return Ok(true),
                Ok(_) => continue,
                Err(err) if err.is_no_such_file() => return Ok(false),
                Err(err) => return Err(err),
            }
        }

        Ok(false)
    }

    fn decide(&self, pair: &MapPair, exec: &mut dyn Executor) -> Result<()> {
        for nd in [&pair.src, &pair.dst].into_iter().flatten() {
            if is_conflict_path(&nd.path()) {
                return exec.handle_conflict_node(nd);
            }
        }

        let (src, dst) = match (&pair.src, &pair.dst) {
            (Some(src), Some(dst)) if pair.src_was_moved => return exec.handle_move(src, dst),
            (None, Some(dst)) if pair.src_was_removed => return exec.handle_remove(dst),
            (None, Some(dst)) => return exec.handle_missing(dst),
            (Some(src), None) => return exec.handle_add(src),
            (Some(src), Some(dst)) => (src, dst),
            (None, None) => {
                return Err(CatfsError::bad_node("mapper reported an empty pair"));
            }
        };

        if pair.type_mismatch {
            debug!(
                src = %src.path(),
                src_type = %src.node_type(),
                dst = %dst.path(),
                dst_type = %dst.node_type(),
                "Type mismatch, leaving both alone"
            );
            return exec.handle_type_conflict(src, dst);
        }

        let (conflict, src_mask, dst_mask) = self.has_conflicts(src, dst)?;
        if conflict {
            if self.has_conflict_copy(src, dst)? {
                debug!(dst = %dst.path(), "Conflict copy exists already");
                return Ok(());
            }

            return exec.handle_conflict(src, dst, src_mask, dst_mask);
        }

        if src_mask.is_none() {
            debug!(dst = %dst.path(), "No remote changes to merge");
            return Ok(());
        }

        if self.has_conflict_copy(src, dst)? {
            debug!(dst = %dst.path(), "Remote version lives in a conflict copy, not merging");
            return Ok(());
        }

        exec.handle_merge(src, dst, src_mask, dst_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::coreutils;
    use crate::nodes::hasher;
    use crate::store::Database;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Executor for Recorder {
        fn handle_add(&mut self, src: &Node) -> Result<()> {
            self.events.push(format!("add {}", src.path()));
            Ok(())
        }

        fn handle_remove(&mut self, dst: &Node) -> Result<()> {
            self.events.push(format!("remove {}", dst.path()));
            Ok(())
        }

        fn handle_missing(&mut self, dst: &Node) -> Result<()> {
            self.events.push(format!("missing {}", dst.path()));
            Ok(())
        }

        fn handle_move(&mut self, src: &Node, dst: &Node) -> Result<()> {
            self.events.push(format!("move {} {}", src.path(), dst.path()));
            Ok(())
        }

        fn handle_merge(&mut self, src: &Node, _: &Node, src_mask: ChangeType, dst_mask: ChangeType) -> Result<()> {
            self.events.push(format!("merge {} {} {}", src.path(), src_mask, dst_mask));
            Ok(())
        }

        fn handle_conflict(&mut self, src: &Node, _: &Node, src_mask: ChangeType, dst_mask: ChangeType) -> Result<()> {
            self.events.push(format!("conflict {} {} {}", src.path(), src_mask, dst_mask));
            Ok(())
        }

        fn handle_type_conflict(&mut self, src: &Node, _: &Node) -> Result<()> {
            self.events.push(format!("type {}", src.path()));
            Ok(())
        }

        fn handle_conflict_node(&mut self, nd: &Node) -> Result<()> {
            self.events.push(format!("conflict-node {}", nd.path()));
            Ok(())
        }
    }

    fn linker(owner: &str) -> Linker {
        let lkr = Linker::new(Arc::new(Database::memory()));
        lkr.set_owner(owner).unwrap();
        lkr.make_commit(owner, "init").unwrap();
        lkr
    }

    fn touch_and_commit(lkr: &Linker, repo_path: &str, seed: u8) {
        let content = hasher::content_hash(&[seed]);
        coreutils::stage(lkr, repo_path, content, content, seed as u64, Vec::new()).unwrap();
        lkr.make_commit("test", &format!("cmt {}", seed)).unwrap();
    }

    fn resolve(src: &Linker, dst: &Linker) -> Vec<String> {
        let mut rec = Recorder::default();
        Resolver::new(src, dst, None, None).unwrap().resolve(&mut rec).unwrap();
        rec.events
    }

    #[test]
    fn test_conflict_path_pattern() {
        assert!(is_conflict_path("/a/x.png.conflict.0"));
        assert!(is_conflict_path("/x.conflict.42"));
        assert!(!is_conflict_path("/x.conflict."));
        assert!(!is_conflict_path("/.conflict.1"));
        assert!(!is_conflict_path("/x.conflict.a"));
        assert!(!is_conflict_path("/x.png"));
        assert_eq!(conflict_name("x.png", 3), "x.png.conflict.3");
    }

    #[test]
    fn test_both_added_is_conflict() {
        let (src, dst) = (linker("src"), linker("dst"));
        touch_and_commit(&src, "/x.png", 23);
        touch_and_commit(&dst, "/x.png", 42);

        assert_eq!(resolve(&src, &dst), vec!["conflict /x.png added added"]);
    }

    #[test]
    fn test_add_and_missing() {
        let (src, dst) = (linker("src"), linker("dst"));
        touch_and_commit(&src, "/a.png", 1);
        touch_and_commit(&dst, "/b.png", 2);

        assert_eq!(resolve(&src, &dst), vec!["add /a.png", "missing /b.png"]);
    }

    #[test]
    fn test_conflict_nodes_are_left_alone() {
        let (src, dst) = (linker("src"), linker("dst"));
        touch_and_commit(&src, "/a", 1);
        touch_and_commit(&dst, "/a", 1);
        touch_and_commit(&dst, "/a.conflict.0", 2);

        assert_eq!(resolve(&src, &dst), vec!["conflict-node /a.conflict.0"]);
    }

    #[test]
    fn test_last_common_merge_is_most_recent() {
        let (src, dst) = (linker("src"), linker("dst"));
        touch_and_commit(&src, "/x", 1);
        let first = src.head().unwrap();
        touch_and_commit(&src, "/x", 2);
        let second = src.head().unwrap();

        touch_and_commit(&dst, "/y", 1);
        dst.set_merge_marker("src", first.tree_hash()).unwrap();
        touch_and_commit(&dst, "/y", 2);
        dst.set_merge_marker("src", second.tree_hash()).unwrap();
        touch_and_commit(&dst, "/y", 3);

        let mut rv = Resolver::new(&src, &dst, None, None).unwrap();
        rv.cache_last_common_merge().unwrap();
        assert_eq!(rv.src_merge_cmt.unwrap().tree_hash(), second.tree_hash());
        assert!(rv.dst_merge_cmt.unwrap().merge_marker().is_some());
    }
}
