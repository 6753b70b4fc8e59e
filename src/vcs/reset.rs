//! Bringing back old versions of single paths

use crate::error::{CatfsError, Result};
use crate::linker::coreutils::{self, StageInfo};
use crate::linker::Linker;
use crate::nodes::{path, walk, Commit, Node, WalkControl};
use crate::vcs::change::ChangeType;
use crate::vcs::history::HistoryWalker;
use tracing::{debug, info, instrument};

fn lookup_optional(lkr: &Linker, repo_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_node(repo_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

fn lookup_optional_at(lkr: &Linker, cmt: &Commit, repo_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_node_at(cmt, repo_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Path the node currently at `curr_path` had in `cmt`.
/// Falls back to `curr_path` if the node did not exist back then.
fn find_path_at(lkr: &Linker, cmt: &Commit, curr_path: &str) -> Result<String> {
    let Some(nd) = lookup_optional(lkr, curr_path)? else {
        return Ok(curr_path.to_string());
    };

    for state in HistoryWalker::new(lkr, lkr.status()?, nd) {
        let state = state?;
        if state.head.tree_hash() == cmt.tree_hash() {
            return Ok(state.curr.path());
        }
    }

    Ok(curr_path.to_string())
}

/// Reset the node at `curr_path` to the state it had in `cmt`.
///
/// If the node was moved since, the old version is written to the current
/// path. If it did not exist in `cmt`, it is removed (leaving a ghost).
/// Refuses with `StageNotEmpty` if the path has uncommitted changes,
/// unless `force` is set.
#[instrument(skip(lkr, cmt), fields(commit = %cmt.tree_hash().short()))]
pub fn reset_node(lkr: &Linker, cmt: &Commit, curr_path: &str, force: bool) -> Result<()> {
    let curr_path = path::clean(curr_path);
    if curr_path == "/" {
        return Err(CatfsError::InvalidOperation(
            "resetting the root is a checkout; use checkout_commit".to_string(),
        ));
    }

    let current = lookup_optional(lkr, &curr_path)?;
    if !force {
        let at_head = lookup_optional_at(lkr, &lkr.head()?, &curr_path)?;
        if current.as_ref().map(Node::tree_hash) != at_head.as_ref().map(Node::tree_hash) {
            return Err(CatfsError::StageNotEmpty);
        }
    }

    let root = lkr
        .directory_by_hash(&cmt.root())?
        .ok_or(CatfsError::NoSuchHash(cmt.root()))?;

    let old_path = find_path_at(lkr, cmt, &curr_path)?;
    let old_node = match root.lookup(lkr, &old_path) {
        Ok(Node::Ghost(_)) => None,
        Ok(nd) => Some(nd),
        Err(err) if err.is_no_such_file() => None,
        Err(err) => return Err(err),
    };

    lkr.atomic(|| {
        let Some(old_node) = old_node else {
            // Did not exist back then.
            if let Some(current) = current.filter(|nd| !nd.is_ghost()) {
                coreutils::remove(lkr, &current, true, false)?;
            }
            return Ok(());
        };

        if let Some(current) = &current {
            coreutils::remove(lkr, current, false, true)?;
        }

        let parent_path = path::dirname(&curr_path);
        let mut parent = coreutils::mkdir(lkr, &parent_path, true)?;
        let mut restored = old_node.relocate(lkr, &curr_path)?;
        parent.add(lkr, &mut restored)?;

        walk(lkr, &restored, true, &mut |child| {
            lkr.stage_node(child)?;
            Ok(WalkControl::Continue)
        })?;

        info!(path = %curr_path, was = %old_path, "Reset node");
        Ok(())
    })
}

/// Restore the last version of the removed node at `repo_path`.
///
/// The node must be a ghost. Ghosts that were left behind by a move can not
/// be undeleted; the node still exists elsewhere.
#[instrument(skip(lkr))]
pub fn undelete(lkr: &Linker, repo_path: &str) -> Result<()> {
    let nd = lkr.lookup_node(repo_path)?;
    if !nd.is_ghost() {
        return Err(CatfsError::InvalidOperation(format!(
            "{} is not a removed node",
            repo_path
        )));
    }

    let mut newer_was_moved = false;
    let mut original = None;

    for state in HistoryWalker::new(lkr, lkr.status()?, nd) {
        let state = state?;

        // The first alive state after a plain remove is what we are after.
        if !state.curr.is_ghost()
            && state.mask.contains(ChangeType::REMOVE)
            && !state.mask.intersects(ChangeType::MOVE)
            && !newer_was_moved
        {
            original = Some(state.curr);
            break;
        }

        newer_was_moved = state.moved_to.is_some();
    }

    let Some(original) = original else {
        return Err(CatfsError::InvalidOperation(format!(
            "no state found where {} was not removed",
            repo_path
        )));
    };

    lkr.atomic(|| {
        walk(lkr, &original, true, &mut |child| {
            match child {
                // Directories with content are created by staging their files.
                Node::Directory(dir) if dir.n_children() == 0 => {
                    coreutils::mkdir(lkr, &dir.path(), true)?;
                }
                Node::File(file) => {
                    coreutils::stage_with_full_info(
                        lkr,
                        &file.path(),
                        StageInfo {
                            content: file.content_hash(),
                            backend: file.backend_hash(),
                            size: file.size(),
                            cached_size: file.cached_size(),
                            key: file.key().to_vec(),
                            mod_time: child.mod_time(),
                        },
                    )?;
                }
                _ => {}
            }

            Ok(WalkControl::Continue)
        })
    })?;

    debug!(path = %repo_path, "Undeleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::hasher;
    use crate::store::Database;
    use std::sync::Arc;

    fn linker() -> Linker {
        let lkr = Linker::new(Arc::new(Database::memory()));
        lkr.set_owner("alice").unwrap();
        lkr.make_commit("alice", "init").unwrap();
        lkr
    }

    fn touch_and_commit(lkr: &Linker, repo_path: &str, seed: u8) -> Commit {
        let content = hasher::content_hash(&[seed]);
        coreutils::stage(lkr, repo_path, content, content, seed as u64, Vec::new()).unwrap();
        lkr.make_commit("alice", &format!("cmt {}", seed)).unwrap()
    }

    #[test]
    fn test_reset_file_to_older_version() {
        let lkr = linker();
        let c1 = touch_and_commit(&lkr, "/x", 1);
        touch_and_commit(&lkr, "/x", 2);

        reset_node(&lkr, &c1, "/x", false).unwrap();
        let x = lkr.lookup_file("/x").unwrap();
        assert_eq!(x.content_hash(), hasher::content_hash(&[1]));
        assert_eq!(x.size(), 1);
    }

    #[test]
    fn test_reset_refuses_staged_changes() {
        let lkr = linker();
        let c1 = touch_and_commit(&lkr, "/x", 1);
        let content = hasher::content_hash(&[2]);
        coreutils::stage(&lkr, "/x", content, content, 2, Vec::new()).unwrap();

        let err = reset_node(&lkr, &c1, "/x", false).unwrap_err();
        assert!(matches!(err, CatfsError::StageNotEmpty));

        reset_node(&lkr, &c1, "/x", true).unwrap();
        assert_eq!(lkr.lookup_file("/x").unwrap().content_hash(), hasher::content_hash(&[1]));
    }

    #[test]
    fn test_reset_follows_moves() {
        let lkr = linker();
        let c1 = touch_and_commit(&lkr, "/x", 1);
        let x = lkr.lookup_node("/x").unwrap();
        coreutils::move_node(&lkr, &x, "/y").unwrap();
        lkr.make_commit("alice", "move").unwrap();
        touch_and_commit(&lkr, "/y", 2);

        reset_node(&lkr, &c1, "/y", false).unwrap();
        let y = lkr.lookup_file("/y").unwrap();
        assert_eq!(y.content_hash(), hasher::content_hash(&[1]));
    }

    #[test]
    fn test_reset_to_before_existence_removes() {
        let lkr = linker();
        let init = lkr.head().unwrap();
        touch_and_commit(&lkr, "/x", 1);

        reset_node(&lkr, &init, "/x", false).unwrap();
        assert!(lkr.lookup_node("/x").unwrap().is_ghost());
    }

    #[test]
    fn test_reset_root_is_refused() {
        let lkr = linker();
        let head = lkr.head().unwrap();
        assert!(matches!(
            reset_node(&lkr, &head, "/", true),
            Err(CatfsError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_undelete_file() {
        let lkr = linker();
        touch_and_commit(&lkr, "/dir/x", 7);
        let x = lkr.lookup_node("/dir/x").unwrap();
        coreutils::remove(&lkr, &x, true, false).unwrap();
        lkr.make_commit("alice", "remove").unwrap();

        undelete(&lkr, "/dir/x").unwrap();
        let x = lkr.lookup_file("/dir/x").unwrap();
        assert_eq!(x.content_hash(), hasher::content_hash(&[7]));
        assert_eq!(x.size(), 7);
    }

    #[test]
    fn test_undelete_directory_with_empty_subdir() {
        let lkr = linker();
        coreutils::mkdir(&lkr, "/dir/empty", true).unwrap();
        touch_and_commit(&lkr, "/dir/x", 7);
        let dir = lkr.lookup_node("/dir").unwrap();
        coreutils::remove(&lkr, &dir, true, false).unwrap();

        undelete(&lkr, "/dir").unwrap();
        assert!(lkr.lookup_directory("/dir/empty").is_ok());
        assert!(lkr.lookup_file("/dir/x").is_ok());
    }

    #[test]
    fn test_undelete_needs_ghost() {
        let lkr = linker();
        touch_and_commit(&lkr, "/x", 1);
        assert!(matches!(
            undelete(&lkr, "/x"),
            Err(CatfsError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_undelete_refuses_moved_ghost() {
        let lkr = linker();
        touch_and_commit(&lkr, "/x", 1);
        let x = lkr.lookup_node("/x").unwrap();
        coreutils::move_node(&lkr, &x, "/y").unwrap();
        lkr.make_commit("alice", "move").unwrap();

        assert!(undelete(&lkr, "/x").is_err());
    }
}
