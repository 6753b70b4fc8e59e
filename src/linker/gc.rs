//! Mark and sweep collection of unreachable node versions
//!
//! Every change to the staging tree writes fresh node versions under
//! `stage/objects`. Most of them are superseded before the next commit; the
//! collector drops those that are neither reachable from the staging commit
//! nor referenced from the move ledger.

use crate::error::{CatfsError, Result};
use crate::linker::Linker;
use crate::nodes::{walk, Commit, Node, WalkControl};
use crate::types::Hash;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Decides whether a collectable node may really be deleted
pub type Notifier<'a> = Box<dyn FnMut(&Node) -> bool + 'a>;

pub struct GarbageCollector<'a> {
    lkr: &'a Linker,
    notifier: Option<Notifier<'a>>,
    marked: HashSet<Hash>,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(lkr: &'a Linker, notifier: Option<Notifier<'a>>) -> Self {
        Self {
            lkr,
            notifier,
            marked: HashSet::new(),
        }
    }

    /// Collect garbage and return the number of removed objects.
    ///
    /// Without `all_objects` only the staging area is swept. With it, the
    /// whole history is marked and the committed object store is swept too.
    #[instrument(skip(self))]
    pub fn run(&mut self, all_objects: bool) -> Result<usize> {
        let start = Instant::now();
        self.marked.clear();

        let status = self.lkr.status()?;
        self.mark(&status, all_objects)?;

        let mut locations = vec!["stage/moves".to_string()];
        if all_objects {
            let mut curr = status.parent_commit(self.lkr)?;
            while let Some(cmt) = curr {
                locations.push(format!("moves/{}", cmt.tree_hash()));
                curr = cmt.parent_commit(self.lkr)?;
            }
        }

        for location in &locations {
            self.mark_move_map(location)?;
        }

        let mut removed = self.sweep("stage/objects")?;
        debug!(removed, "Swept staging objects");

        if all_objects {
            let permanent = self.sweep("objects")?;
            if permanent > 0 {
                warn!(
                    removed = permanent,
                    "Removed unreachable permanent objects; the object store was inconsistent"
                );
            }
            removed += permanent;
        }

        info!(
            removed,
            marked = self.marked.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Garbage collection finished"
        );
        Ok(removed)
    }

    fn mark(&mut self, cmt: &Commit, recursive: bool) -> Result<()> {
        let mut curr = Some(cmt.clone());
        while let Some(cmt) = curr {
            self.marked.insert(cmt.tree_hash());

            let root = self
                .lkr
                .directory_by_hash(&cmt.root())?
                .ok_or(CatfsError::NoSuchHash(cmt.root()))?;

            let marked = &mut self.marked;
            walk(self.lkr, &Node::Directory(root), true, &mut |child| {
                marked.insert(child.tree_hash());
                if let Node::Ghost(ghost) = child {
                    marked.insert(ghost.old_node().tree_hash());
                }
                Ok(WalkControl::Continue)
            })?;

            if !recursive {
                break;
            }

            curr = cmt.parent_commit(self.lkr)?;
        }

        Ok(())
    }

    fn mark_move_map(&mut self, prefix: &str) -> Result<()> {
        for key in self.lkr.kv().keys(prefix)? {
            let Some(raw) = self.lkr.kv().get(&key)? else {
                continue;
            };

            if let Some((nd, _)) = self.lkr.resolve_move_line(&raw)? {
                self.marked.insert(nd.tree_hash());
            }

            // The ledger key itself names a node, either by inode or by hash.
            if let Some(last) = key.rsplit('/').next() {
                if let Some(hash) = Hash::from_hex(last) {
                    self.marked.insert(hash);
                } else if let Ok(inode) = last.parse::<u64>() {
                    if let Some(nd) = self.lkr.node_by_inode(inode)? {
                        self.marked.insert(nd.tree_hash());
                    }
                }
            }
        }

        Ok(())
    }

    fn sweep(&mut self, prefix: &str) -> Result<usize> {
        let lkr = self.lkr;
        let marked = &self.marked;
        let notifier = &mut self.notifier;

        lkr.atomic_with_batch(|batch| {
            let mut removed = 0;
            for key in lkr.kv().keys(prefix)? {
                let Some(hash) = key.rsplit('/').next().and_then(Hash::from_hex) else {
                    continue;
                };

                if marked.contains(&hash) {
                    continue;
                }

                let Some(nd) = lkr.node_by_hash(&hash)? else {
                    continue;
                };

                if let Some(notify) = notifier.as_mut() {
                    if !notify(&nd) {
                        continue;
                    }
                }

                lkr.mem_index_forget(&hash);
                batch.erase(&key);
                removed += 1;
            }

            Ok(removed)
        })
    }
}
