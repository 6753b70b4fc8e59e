//! Move mapping ledger
//!
//! While staging, moves are recorded per inode because the nodes involved
//! can still change. On commit the inodes are pinned to the exact tree
//! hashes that were exported, so older commits keep pointing at the
//! versions that actually moved.
//!
//! A mapping line reads `<dir> inode <n>` or `<dir> hash <hex>`.

use crate::error::{CatfsError, Result};
use crate::linker::{object_key, stage_object_key, Linker};
use crate::store::Batch;
use crate::nodes::{Commit, Node};
use crate::types::Hash;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Direction of a recorded move, seen from the node it is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveDir {
    /// The node was moved here from its partner
    SrcToDst,
    /// The node marks the place its partner was moved away from
    DstToSrc,
    /// The node did not take part in a move
    None,
}

impl MoveDir {
    pub fn invert(self) -> MoveDir {
        match self {
            MoveDir::SrcToDst => MoveDir::DstToSrc,
            MoveDir::DstToSrc => MoveDir::SrcToDst,
            MoveDir::None => MoveDir::None,
        }
    }

    fn parse(symbol: &str) -> Option<MoveDir> {
        match symbol {
            ">" => Some(MoveDir::SrcToDst),
            "<" => Some(MoveDir::DstToSrc),
            "*" => Some(MoveDir::None),
            _ => None,
        }
    }
}

impl fmt::Display for MoveDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoveDir::SrcToDst => ">",
            MoveDir::DstToSrc => "<",
            MoveDir::None => "*",
        };
        f.write_str(s)
    }
}

/// Reference part of a mapping line
#[derive(Debug, Clone, PartialEq, Eq)]
enum MoveTarget {
    Inode(u64),
    Hash(Hash),
}

fn parse_move_line(line: &str) -> Result<(MoveDir, MoveTarget)> {
    let malformed = || CatfsError::MalformedMoveLine(line.to_string());
    let mut parts = line.splitn(3, ' ');
    let (Some(dir), Some(kind), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };

    let dir = MoveDir::parse(dir).ok_or_else(malformed)?;
    let target = match kind {
        "inode" => MoveTarget::Inode(id.trim().parse().map_err(|_| malformed())?),
        "hash" => MoveTarget::Hash(Hash::from_hex(id.trim()).ok_or_else(malformed)?),
        _ => return Err(malformed()),
    };

    Ok((dir, target))
}

impl Linker {
    pub(crate) fn resolve_move_line(&self, raw: &[u8]) -> Result<Option<(Node, MoveDir)>> {
        let line = String::from_utf8_lossy(raw);
        let (dir, target) = parse_move_line(&line)?;
        let nd = match target {
            MoveTarget::Inode(inode) => self.node_by_inode(inode)?,
            MoveTarget::Hash(hash) => self.node_by_hash(&hash)?,
        };

        Ok(nd.map(|nd| (nd, dir)))
    }

    /// Record that the node with inode `moved` left a ghost with inode
    /// `ghost` at its old place. The first mapping recorded for an inode wins.
    pub fn add_move_mapping(&self, moved: u64, ghost: u64) -> Result<()> {
        self.atomic_with_batch(|batch| {
            for (inode, dir, partner) in [
                (moved, MoveDir::SrcToDst, ghost),
                (ghost, MoveDir::DstToSrc, moved),
            ] {
                let key = format!("stage/moves/{}", inode);
                if self.kv().contains(&key)? {
                    warn!(inode, "Inode already has a move mapping, keeping the first one");
                    continue;
                }

                let line = format!("{} inode {}", dir, partner);
                batch.put(&key, line.clone());
                batch.put(&format!("stage/moves/overlay/{}", inode), line);
            }

            Ok(())
        })
    }

    /// Pin all staged moves of exported inodes to hashes under `status`.
    /// Called while `status` is being turned into a real commit.
    pub(crate) fn commit_move_mapping(
        &self,
        status: &Commit,
        exported: &mut HashSet<u64>,
    ) -> Result<()> {
        self.atomic_with_batch(|batch| {
            let cmt_hex = status.tree_hash().to_hex();

            for key in self.kv().keys("stage/moves")? {
                if key.starts_with("stage/moves/overlay/") {
                    continue;
                }

                let inode: u64 = key
                    .rsplit('/')
                    .next()
                    .and_then(|last| last.parse().ok())
                    .ok_or_else(|| CatfsError::MalformedMoveLine(key.clone()))?;

                // Intermediate moves of nodes that never made it into the tree
                // are not worth remembering.
                if !exported.contains(&inode) {
                    continue;
                }

                let Some(raw) = self.kv().get(&key)? else {
                    continue;
                };

                let (dst, dir) = self.resolve_move_line(&raw)?.ok_or_else(|| {
                    CatfsError::BadNode(format!(
                        "no destination for move line {}",
                        String::from_utf8_lossy(&raw)
                    ))
                })?;

                if dir == MoveDir::DstToSrc {
                    continue;
                }

                let src = self.node_by_inode(inode)?.ok_or_else(|| {
                    CatfsError::BadNode(format!("no source node for move of inode {}", inode))
                })?;

                let src_hex = src.tree_hash().to_hex();
                let dst_hex = dst.tree_hash().to_hex();

                let forward = format!("{} hash {}", dir, dst_hex);
                batch.put(&format!("moves/{}/{}", cmt_hex, src_hex), forward.clone());
                batch.put(&format!("moves/overlay/{}", src_hex), forward);

                let reverse = format!("{} hash {}", dir.invert(), src_hex);
                batch.put(&format!("moves/{}/{}", cmt_hex, dst_hex), reverse.clone());
                batch.put(&format!("moves/overlay/{}", dst_hex), reverse);

                // Ghosts overwritten before the commit are not reachable from
                // the root but are still needed to follow the history. The
                // same goes for the old children of a moved directory.
                for nd in [&dst, &src] {
                    self.export_staged_subtree(batch, nd)?;
                }

                debug!(src = %src.path(), dst = %dst.path(), "Committed move mapping");
                exported.remove(&src.inode());
                exported.remove(&dst.inode());
            }

            Ok(())
        })
    }

    /// Copy `nd` and everything below it (including the old version kept
    /// by a ghost) from the staging area into the object store.
    fn export_staged_subtree(&self, batch: &Batch<'_>, nd: &Node) -> Result<()> {
        let mut pending = vec![nd.clone()];
        let mut seen = HashSet::new();

        while let Some(curr) = pending.pop() {
            let hash = curr.tree_hash();
            if !seen.insert(hash) {
                continue;
            }

            if !self.kv().contains(&object_key(&hash))? {
                if let Some(data) = self.kv().get(&stage_object_key(&hash))? {
                    batch.put(&object_key(&hash), data);
                }
            }

            match curr {
                Node::Ghost(ghost) => pending.push(ghost.old_node().clone()),
                Node::Directory(dir) => {
                    for (name, child_hash) in &dir.children {
                        match self.node_by_hash(child_hash)? {
                            Some(child) => pending.push(child),
                            None => warn!(
                                dir = %dir.path(),
                                child = %name,
                                "Child of moved node is gone, not exporting it"
                            ),
                        }
                    }
                }
                Node::File(_) | Node::Commit(_) => {}
            }
        }

        Ok(())
    }

    /// The node `nd` was moved to (or from) in the commit `cmt`.
    ///
    /// Without a commit (or with the staging commit) the staged moves are
    /// consulted first; they are keyed by inode.
    pub fn move_mapping(&self, cmt: Option<&Commit>, nd: &Node) -> Result<Option<(Node, MoveDir)>> {
        let in_stage = match cmt {
            None => true,
            Some(cmt) => self
                .status()
                .map(|status| status.tree_hash() == cmt.tree_hash())?,
        };

        if in_stage {
            if let Some(raw) = self.kv().get(&format!("stage/moves/{}", nd.inode()))? {
                if let Some(found) = self.resolve_move_line(&raw)? {
                    return Ok(Some(found));
                }
            }
        }

        let Some(cmt) = cmt else {
            return Ok(None);
        };

        let key = format!("moves/{}/{}", cmt.tree_hash(), nd.tree_hash());
        match self.kv().get(&key)? {
            Some(raw) => self.resolve_move_line(&raw),
            None => Ok(None),
        }
    }

    /// Whether `nd` took part in any move, staged or committed
    pub fn move_entry_point(&self, nd: &Node) -> Result<Option<(Node, MoveDir)>> {
        let staged = self.kv().get(&format!("stage/moves/overlay/{}", nd.inode()))?;
        let raw = match staged {
            Some(raw) => raw,
            None => match self.kv().get(&format!("moves/overlay/{}", nd.tree_hash()))? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };

        self.resolve_move_line(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::coreutils;
    use crate::nodes::hasher;
    use crate::store::Database;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn linker() -> Linker {
        let lkr = Linker::new(Arc::new(Database::memory()));
        lkr.set_owner("alice").unwrap();
        lkr.make_commit("alice", "init").unwrap();
        lkr
    }

    #[test]
    fn test_parse_move_line() {
        assert_eq!(
            parse_move_line("> inode 12").unwrap(),
            (MoveDir::SrcToDst, MoveTarget::Inode(12))
        );

        let hash = Hash::sum(b"x");
        let line = format!("< hash {}", hash);
        assert_eq!(
            parse_move_line(&line).unwrap(),
            (MoveDir::DstToSrc, MoveTarget::Hash(hash))
        );

        for bad in ["", "> inode", "? inode 1", "> path /x", "> inode abc", "> hash zz"] {
            assert!(
                matches!(parse_move_line(bad), Err(CatfsError::MalformedMoveLine(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    proptest! {
        #[test]
        fn prop_inode_lines_parse(inode in any::<u64>(), dir_idx in 0usize..3) {
            let dir = [MoveDir::SrcToDst, MoveDir::DstToSrc, MoveDir::None][dir_idx];
            let line = format!("{} inode {}", dir, inode);
            prop_assert_eq!(parse_move_line(&line).unwrap(), (dir, MoveTarget::Inode(inode)));
        }

        #[test]
        fn prop_garbage_never_panics(line in "\\PC*") {
            let _ = parse_move_line(&line);
        }
    }

    #[test]
    fn test_move_dir_invert() {
        assert_eq!(MoveDir::SrcToDst.invert(), MoveDir::DstToSrc);
        assert_eq!(MoveDir::DstToSrc.invert(), MoveDir::SrcToDst);
        assert_eq!(MoveDir::None.invert(), MoveDir::None);
        assert_eq!(MoveDir::SrcToDst.to_string(), ">");
    }

    #[test]
    fn test_first_mapping_wins() {
        let lkr = linker();
        lkr.add_move_mapping(10, 11).unwrap();
        lkr.add_move_mapping(10, 12).unwrap();

        let raw = lkr.kv().get("stage/moves/10").unwrap().unwrap();
        assert_eq!(String::from_utf8(raw).unwrap(), "> inode 11");
        let raw = lkr.kv().get("stage/moves/11").unwrap().unwrap();
        assert_eq!(String::from_utf8(raw).unwrap(), "< inode 10");
    }

    #[test]
    fn test_mapping_survives_commit() {
        let lkr = linker();
        let content = hasher::content_hash(b"x");
        coreutils::stage(&lkr, "/x", content, content, 1, Vec::new()).unwrap();
        lkr.make_commit("alice", "x").unwrap();

        let x = lkr.lookup_node("/x").unwrap();
        coreutils::move_node(&lkr, &x, "/y").unwrap();

        let y = lkr.lookup_node("/y").unwrap();
        let ghost = lkr.lookup_node("/x").unwrap();
        assert!(ghost.is_ghost());

        // The ghost points forward to where the node went...
        let (to, dir) = lkr.move_mapping(None, &ghost).unwrap().unwrap();
        assert_eq!(dir, MoveDir::DstToSrc);
        assert_eq!(to.path(), "/y");

        // ...and the moved node points back to the ghost it left behind.
        let (from, dir) = lkr.move_mapping(None, &y).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
        assert_eq!(from.path(), "/x");

        let cmt = lkr.make_commit("alice", "move").unwrap();
        assert!(lkr.kv().keys("stage/moves").unwrap().is_empty());

        let (from, dir) = lkr.move_mapping(Some(&cmt), &y).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
        assert_eq!(from.tree_hash(), ghost.tree_hash());

        let (to, dir) = lkr.move_mapping(Some(&cmt), &ghost).unwrap().unwrap();
        assert_eq!(dir, MoveDir::DstToSrc);
        assert_eq!(to.tree_hash(), y.tree_hash());

        let (_, dir) = lkr.move_entry_point(&y).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
    }

    #[test]
    fn test_moved_directory_keeps_uncommitted_children() {
        let kv = Arc::new(Database::memory());
        let lkr = Linker::new(Arc::clone(&kv));
        lkr.set_owner("alice").unwrap();
        lkr.make_commit("alice", "init").unwrap();

        let content = hasher::content_hash(b"x");
        let x = coreutils::stage(&lkr, "/d/x", content, content, 1, Vec::new()).unwrap();
        let dir = lkr.lookup_node("/d").unwrap();
        coreutils::move_node(&lkr, &dir, "/e").unwrap();
        lkr.make_commit("alice", "move d").unwrap();

        assert!(kv.contains(&object_key(&x.tree_hash())).unwrap());

        let reloaded = Linker::new(kv);
        let ghost = reloaded.lookup_ghost("/d").unwrap();
        let old_x = ghost.old_directory().unwrap().lookup(&reloaded, "x").unwrap();
        assert_eq!(old_x.path(), "/d/x");
        assert_eq!(old_x.content_hash(), content);
    }
}
