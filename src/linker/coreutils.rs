//! Filesystem verbs on top of the linker
//!
//! Each operation runs inside one linker transaction, so a failure half-way
//! leaves the staging area untouched.

use crate::error::{CatfsError, Result};
use crate::linker::Linker;
use crate::nodes::{parent_directory, path, walk, Commit, Directory, File, Ghost, Node, WalkControl};
use crate::types::Hash;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Everything [`stage_with_full_info`] needs to know about a file
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub content: Hash,
    pub backend: Hash,
    pub size: u64,
    pub cached_size: u64,
    pub key: Vec<u8>,
    pub mod_time: DateTime<Utc>,
}

fn lookup_optional(lkr: &Linker, repo_path: &str) -> Result<Option<Node>> {
    match lkr.lookup_node(repo_path) {
        Ok(nd) => Ok(Some(nd)),
        Err(err) if err.is_no_such_file() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Create the directory at `repo_path`. Existing directories are returned
/// as they are; missing parents are only created with `create_parents`.
pub fn mkdir(lkr: &Linker, repo_path: &str, create_parents: bool) -> Result<Directory> {
    let repo_path = path::clean(repo_path);
    if repo_path == "/" {
        return lkr.root();
    }

    let dirname = path::dirname(&repo_path);
    let basename = path::basename(&repo_path);

    lkr.atomic(|| {
        let mut parent = match lookup_optional(lkr, &dirname)? {
            Some(Node::Directory(dir)) => dir,
            Some(Node::Ghost(_)) | None if create_parents => mkdir_parents(lkr, &repo_path)?,
            Some(Node::Ghost(_)) | None => return Err(CatfsError::NoSuchFile(dirname.clone())),
            Some(other) => {
                return Err(CatfsError::Exists(format!(
                    "{} exists and is a {}",
                    dirname,
                    other.node_type()
                )))
            }
        };

        match parent.child(lkr, &basename)? {
            Some(Node::Directory(dir)) => return Ok(dir),
            Some(ghost @ Node::Ghost(_)) => parent.remove_child(lkr, &ghost)?,
            Some(other) => {
                return Err(CatfsError::Exists(format!(
                    "{} exists and is a {}",
                    repo_path,
                    other.node_type()
                )))
            }
            None => {}
        }

        let mut dir = Node::Directory(Directory::new(&basename, &lkr.owner()?, lkr.next_inode()?));
        parent.add(lkr, &mut dir)?;
        lkr.stage_node(&dir)?;

        debug!(path = %repo_path, "mkdir");
        dir.into_directory()
    })
}

/// Make sure every directory above `repo_path` exists (`mkdir -p` on its
/// dirname) and return the immediate parent.
pub fn mkdir_parents(lkr: &Linker, repo_path: &str) -> Result<Directory> {
    let mut curr = "/".to_string();
    let mut dir = lkr.root()?;

    for elem in path::split(&path::dirname(repo_path)) {
        curr = path::join(&curr, &elem);
        dir = mkdir(lkr, &curr, false)?;
    }

    Ok(dir)
}

/// Unlink `nd` from its parent, optionally leaving a ghost in its place.
/// Returns the updated parent and the ghost, if one was made.
pub fn remove(
    lkr: &Linker,
    nd: &Node,
    create_ghost: bool,
    force: bool,
) -> Result<(Directory, Option<Ghost>)> {
    if !force && nd.is_ghost() {
        return Err(CatfsError::IsGhost(nd.path()));
    }

    let Some(mut parent) = parent_directory(lkr, nd)? else {
        return Err(CatfsError::InvalidOperation(
            "refusing to remove the root directory".to_string(),
        ));
    };

    lkr.atomic(|| {
        parent.remove_child(lkr, nd)?;
        lkr.stage_node(&Node::Directory(parent.clone()))?;

        if !create_ghost {
            return Ok((parent, None));
        }

        let ghost = Ghost::new(lkr, nd.clone(), lkr.next_inode()?)?;
        let mut ghost = Node::Ghost(ghost);
        parent.add(lkr, &mut ghost)?;
        lkr.stage_node(&ghost)?;

        Ok((parent, Some(ghost.into_ghost()?)))
    })
}

/// Find the directory `nd` should end up in when moved or copied to `dst`,
/// clearing whatever occupies the target slot if that is allowed.
fn prepare_parent(lkr: &Linker, nd: &Node, dst: &str) -> Result<Directory> {
    let dest = match lookup_optional(lkr, dst)? {
        Some(dest) => dest,
        None => return lkr.lookup_directory(&path::dirname(dst)),
    };

    match dest {
        Node::Directory(dest_dir) => {
            let dest_path = dest_dir.path();
            match dest_dir.child(lkr, nd.name())? {
                None => return Ok(dest_dir),
                Some(ghost @ Node::Ghost(_)) => {
                    remove(lkr, &ghost, false, true)?;
                }
                Some(Node::Directory(child)) if nd.as_directory().is_some() => {
                    if child.n_children() > 0 {
                        return Err(CatfsError::NotEmpty(child.path()));
                    }

                    warn!(path = %child.path(), "Replacing empty directory");
                    remove(lkr, &Node::Directory(child), false, false)?;
                }
                Some(child) => {
                    return Err(CatfsError::Exists(format!(
                        "cannot overwrite {} {} with {} {}",
                        child.node_type(),
                        child.path(),
                        nd.node_type(),
                        nd.path()
                    )))
                }
            }

            lkr.lookup_directory(&dest_path)
        }
        file @ Node::File(_) => {
            info!(path = %file.path(), "Overwriting file");
            Ok(remove(lkr, &file, false, false)?.0)
        }
        ghost @ Node::Ghost(_) => Ok(remove(lkr, &ghost, false, true)?.0),
        Node::Commit(_) => Err(CatfsError::bad_node(format!("{} is a commit", dst))),
    }
}

fn check_relocation(nd: &Node, dst: &str, verb: &str) -> Result<()> {
    let src = nd.path();
    if src == dst {
        return Err(CatfsError::InvalidOperation(format!(
            "cannot {} {}: source and destination are the same",
            verb, src
        )));
    }

    if path::is_within(&src, dst) {
        return Err(CatfsError::InvalidOperation(format!(
            "cannot {} {} into its own subdirectory {}",
            verb, src, dst
        )));
    }

    Ok(())
}

/// Move `nd` to `dst`, leaving a ghost at the old place and recording the
/// move in the ledger. If `dst` is a directory, `nd` is moved into it.
pub fn move_node(lkr: &Linker, nd: &Node, dst: &str) -> Result<Node> {
    if nd.is_ghost() {
        return Err(CatfsError::IsGhost(nd.path()));
    }

    let dst = path::clean(dst);
    check_relocation(nd, &dst, "move")?;

    lkr.atomic(|| {
        let parent_path = prepare_parent(lkr, nd, &dst)?.path();
        let (_, ghost) = remove(lkr, nd, true, true)?;
        let ghost = ghost.ok_or_else(|| CatfsError::bad_node("move did not leave a ghost"))?;

        let dst = if parent_path == dst {
            path::join(&parent_path, nd.name())
        } else {
            dst.clone()
        };

        let mut moved = nd.clone().relocate(lkr, &dst)?;
        let mut parent = lkr.lookup_directory(&parent_path)?;
        parent.add(lkr, &mut moved)?;

        walk(lkr, &moved, true, &mut |child| {
            lkr.stage_node(child)?;
            Ok(WalkControl::Continue)
        })?;

        lkr.add_move_mapping(moved.inode(), ghost.inode())?;
        debug!(src = %nd.path(), dst = %dst, "move");
        Ok(moved)
    })
}

/// Copy `nd` (recursively) to `dst`. Every copied node gets a fresh inode;
/// ghosts below `nd` are not copied.
pub fn copy(lkr: &Linker, nd: &Node, dst: &str) -> Result<Node> {
    if nd.is_ghost() {
        return Err(CatfsError::IsGhost(nd.path()));
    }

    let dst = path::clean(dst);
    check_relocation(nd, &dst, "copy")?;

    lkr.atomic(|| {
        let parent_path = prepare_parent(lkr, nd, &dst)?.path();
        let (parent_path, name) = if parent_path == dst {
            (parent_path, nd.name().to_string())
        } else {
            (path::dirname(&dst), path::basename(&dst))
        };

        copy_into(lkr, nd, &parent_path, &name)
    })
}

fn copy_into(lkr: &Linker, src: &Node, parent_path: &str, name: &str) -> Result<Node> {
    let inode = lkr.next_inode()?;
    let mut copied = match src {
        Node::Directory(dir) => Node::Directory(Directory::new(name, dir.user(), inode)),
        _ => {
            let mut copied = src.copy_with_inode(inode);
            let base = copied.base_mut();
            base.name = name.to_string();
            base.tree_hash = Hash::EMPTY;
            copied
        }
    };

    let mut parent = lkr.lookup_directory(parent_path)?;
    parent.add(lkr, &mut copied)?;
    lkr.stage_node(&copied)?;

    let Node::Directory(dir) = src else {
        return Ok(copied);
    };

    let copied_path = copied.path();
    for child in dir.children_sorted(lkr)? {
        if child.is_ghost() {
            continue;
        }

        copy_into(lkr, &child, &copied_path, child.name())?;
    }

    lkr.lookup_node(&copied_path)
}

/// Stage a file at `repo_path` with the given content. The cached size is
/// assumed to equal `size`.
pub fn stage(
    lkr: &Linker,
    repo_path: &str,
    content: Hash,
    backend: Hash,
    size: u64,
    key: Vec<u8>,
) -> Result<File> {
    stage_with_full_info(
        lkr,
        repo_path,
        StageInfo {
            content,
            backend,
            size,
            cached_size: size,
            key,
            mod_time: Utc::now(),
        },
    )
}

/// Re-stage `file` at its own path with all of its attributes
pub fn stage_from_file_node(lkr: &Linker, file: &File) -> Result<File> {
    stage_with_full_info(
        lkr,
        &file.path(),
        StageInfo {
            content: file.content_hash(),
            backend: file.backend_hash(),
            size: file.size(),
            cached_size: file.cached_size(),
            key: file.key().to_vec(),
            mod_time: file.base.mod_time,
        },
    )
}

/// Create or update the file at `repo_path`.
///
/// A ghost at that path is replaced by a new file (with a new inode).
/// Staging the backend hash a file already has is a no-op.
pub fn stage_with_full_info(lkr: &Linker, repo_path: &str, info: StageInfo) -> Result<File> {
    let repo_path = path::clean(repo_path);
    let existing = lookup_optional(lkr, &repo_path)?;
    let owner = lkr.owner()?;

    lkr.atomic(|| {
        let existing = match existing {
            Some(ghost @ Node::Ghost(_)) => {
                let mut parent = parent_directory(lkr, &ghost)?.ok_or_else(|| {
                    CatfsError::bad_node(format!("ghost {} has no parent", ghost.path()))
                })?;
                parent.remove_child(lkr, &ghost)?;
                None
            }
            Some(Node::File(file)) => Some(file),
            Some(other) => {
                return Err(CatfsError::Exists(format!(
                    "{} exists and is a {}",
                    repo_path,
                    other.node_type()
                )))
            }
            None => None,
        };

        let (mut parent, mut file) = match existing {
            Some(file) => {
                if file.backend_hash() == info.backend {
                    debug!(path = %repo_path, "Backend hash unchanged, not updating");
                    return Ok(file);
                }

                let nd = Node::File(file.clone());
                let mut parent = parent_directory(lkr, &nd)?.ok_or_else(|| {
                    CatfsError::bad_node(format!("file {} has no parent", repo_path))
                })?;
                parent.remove_child(lkr, &nd)?;
                (parent, file)
            }
            None => {
                let parent = mkdir_parents(lkr, &repo_path)?;
                let file = File::new(&path::basename(&repo_path), &owner, lkr.next_inode()?);
                (parent, file)
            }
        };

        file.set_size(info.size);
        file.set_cached_size(info.cached_size);
        file.set_content(lkr, info.content);
        file.set_backend(info.backend);
        file.set_key(info.key);
        file.set_user(&owner);
        file.base.mod_time = info.mod_time;

        let mut nd = Node::File(file);
        parent.add(lkr, &mut nd)?;
        lkr.stage_node(&nd)?;

        debug!(path = %repo_path, backend = %info.backend.short(), "Staged file");
        nd.into_file()
    })
}

/// Call `visit` for `start` and each of its ancestors, newest first
pub fn log<F>(lkr: &Linker, start: &Commit, mut visit: F) -> Result<()>
where
    F: FnMut(&Commit) -> Result<()>,
{
    let mut curr = Some(start.clone());
    while let Some(cmt) = curr {
        visit(&cmt)?;
        curr = cmt.parent_commit(lkr)?;
    }

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

    fn touch(lkr: &Linker, repo_path: &str, seed: u8) -> File {
        let content = hasher::content_hash(&[seed]);
        stage(lkr, repo_path, content, content, seed as u64, Vec::new()).unwrap()
    }

    #[test]
    fn test_mkdir() {
        let lkr = linker();
        assert!(mkdir(&lkr, "/a/b", false).unwrap_err().is_no_such_file());

        let dir = mkdir(&lkr, "/a/b", true).unwrap();
        assert_eq!(dir.path(), "/a/b");
        assert_eq!(lkr.lookup_directory("/a").unwrap().order(), vec!["b"]);

        // Creating it again returns the existing directory
        let again = mkdir(&lkr, "/a/b", false).unwrap();
        assert_eq!(again.inode(), dir.inode());

        touch(&lkr, "/a/x", 1);
        assert!(matches!(mkdir(&lkr, "/a/x", false).unwrap_err(), CatfsError::Exists(_)));
        assert_eq!(mkdir(&lkr, "/", false).unwrap().path(), "/");
    }

    #[test]
    fn test_remove_leaves_ghost() {
        let lkr = linker();
        let x = touch(&lkr, "/sub/x", 3);
        let (parent, ghost) = remove(&lkr, &Node::File(x.clone()), true, false).unwrap();
        let ghost = ghost.unwrap();

        assert_eq!(parent.path(), "/sub");
        assert_eq!(parent.size(), 0);
        assert_eq!(ghost.path(), "/sub/x");
        assert_ne!(ghost.inode(), x.inode());
        assert!(lkr.lookup_node("/sub/x").unwrap().is_ghost());

        let err = remove(&lkr, &Node::Ghost(ghost.clone()), true, false).unwrap_err();
        assert!(matches!(err, CatfsError::IsGhost(_)));

        remove(&lkr, &Node::Ghost(ghost), false, true).unwrap();
        assert!(lkr.lookup_node("/sub/x").unwrap_err().is_no_such_file());
    }

    #[test]
    fn test_remove_root_fails() {
        let lkr = linker();
        let root = Node::Directory(lkr.root().unwrap());
        assert!(matches!(
            remove(&lkr, &root, true, false).unwrap_err(),
            CatfsError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_stage_unchanged_is_noop() {
        let lkr = linker();
        let first = touch(&lkr, "/x", 1);
        let cmt = lkr.make_commit("alice", "x").unwrap();
        let second = touch(&lkr, "/x", 1);

        assert_eq!(first.tree_hash(), second.tree_hash());
        assert!(!lkr.have_staged_changes().unwrap());
        assert_eq!(lkr.head().unwrap().tree_hash(), cmt.tree_hash());
    }

    #[test]
    fn test_stage_modify_keeps_inode() {
        let lkr = linker();
        let first = touch(&lkr, "/x", 1);
        let second = touch(&lkr, "/x", 2);
        assert_eq!(first.inode(), second.inode());
        assert_ne!(first.content_hash(), second.content_hash());
        assert_eq!(lkr.root().unwrap().size(), 2);
    }

    #[test]
    fn test_stage_over_ghost_gets_new_inode() {
        let lkr = linker();
        let first = touch(&lkr, "/x", 1);
        remove(&lkr, &Node::File(first.clone()), true, false).unwrap();
        let second = touch(&lkr, "/x", 2);
        assert_ne!(first.inode(), second.inode());
        assert!(lkr.lookup_file("/x").is_ok());
    }

    #[test]
    fn test_move_file() {
        let lkr = linker();
        let x = touch(&lkr, "/x", 1);
        let moved = move_node(&lkr, &Node::File(x.clone()), "/dir/y").unwrap_err();
        assert!(moved.is_no_such_file());

        mkdir(&lkr, "/dir", false).unwrap();
        let moved = move_node(&lkr, &Node::File(x.clone()), "/dir").unwrap();
        assert_eq!(moved.path(), "/dir/x");
        assert_eq!(moved.inode(), x.inode());
        assert!(lkr.lookup_node("/x").unwrap().is_ghost());
        assert_eq!(lkr.lookup_file("/dir/x").unwrap().content_hash(), x.content_hash());
    }

    #[test]
    fn test_move_directory() {
        let lkr = linker();
        touch(&lkr, "/src/a", 1);
        touch(&lkr, "/src/deep/b", 2);
        let src = lkr.lookup_node("/src").unwrap();

        let err = move_node(&lkr, &src, "/src/deep/inner").unwrap_err();
        assert!(matches!(err, CatfsError::InvalidOperation(_)));

        move_node(&lkr, &src, "/dst").unwrap();
        assert_eq!(lkr.lookup_file("/dst/a").unwrap().size(), 1);
        assert_eq!(lkr.lookup_file("/dst/deep/b").unwrap().size(), 2);
        assert!(lkr.lookup_node("/src").unwrap().is_ghost());
        assert_eq!(lkr.root().unwrap().size(), 3);

        lkr.make_commit("alice", "moved").unwrap();
        assert!(lkr.kv().contains("tree/dst/deep/b").unwrap());
    }

    #[test]
    fn test_move_over_nonempty_directory() {
        let lkr = linker();
        touch(&lkr, "/a/x", 1);
        touch(&lkr, "/b/a/y", 2);
        let a = lkr.lookup_node("/a").unwrap();
        let err = move_node(&lkr, &a, "/b").unwrap_err();
        assert!(matches!(err, CatfsError::NotEmpty(_)));
    }

    #[test]
    fn test_copy_directory() {
        let lkr = linker();
        let a = touch(&lkr, "/src/a", 1);
        touch(&lkr, "/src/sub/b", 2);
        let src = lkr.lookup_node("/src").unwrap();

        let copied = copy(&lkr, &src, "/dst").unwrap();
        assert_eq!(copied.path(), "/dst");
        assert_ne!(copied.inode(), src.inode());
        assert_eq!(copied.content_hash(), src.content_hash());

        let copied_a = lkr.lookup_file("/dst/a").unwrap();
        assert_ne!(copied_a.inode(), a.inode());
        assert_eq!(copied_a.content_hash(), a.content_hash());
        assert!(lkr.lookup_file("/src/a").is_ok());
        assert_eq!(lkr.root().unwrap().size(), 6);
    }

    #[test]
    fn test_log_visits_all_commits() {
        let lkr = linker();
        touch(&lkr, "/x", 1);
        lkr.make_commit("alice", "one").unwrap();
        touch(&lkr, "/x", 2);
        lkr.make_commit("alice", "two").unwrap();

        let mut messages = Vec::new();
        log(&lkr, &lkr.status().unwrap(), |cmt| {
            messages.push(cmt.message().to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(messages, vec!["", "two", "one", "init"]);
    }
}
