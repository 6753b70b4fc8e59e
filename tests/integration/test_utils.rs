//! Shared setup for integration tests

use catfs::linker::{coreutils, Linker};
use catfs::nodes::{hasher, Commit, File, Ghost, Node};
use catfs::store::Database;
use std::sync::Arc;

/// In-memory linker with an owner and an initial commit
pub fn dummy_linker(owner: &str) -> Linker {
    let lkr = Linker::new(Arc::new(Database::memory()));
    lkr.set_owner(owner).unwrap();
    lkr.make_commit(owner, "init").unwrap();
    lkr
}

pub fn with_dummy_linker<F: FnOnce(&Linker)>(f: F) {
    let lkr = dummy_linker("alice");
    f(&lkr);
}

/// Two independent repositories owned by "src" and "dst"
pub fn with_linker_pair<F: FnOnce(&Linker, &Linker)>(f: F) {
    let src = dummy_linker("src");
    let dst = dummy_linker("dst");
    f(&src, &dst);
}

/// Stage a file whose content hash and size are derived from `seed`
pub fn must_touch(lkr: &Linker, repo_path: &str, seed: u8) -> File {
    let content = hasher::content_hash(&[seed]);
    coreutils::stage(lkr, repo_path, content, content, seed as u64, Vec::new()).unwrap()
}

pub fn must_commit(lkr: &Linker, msg: &str) -> Commit {
    let owner = lkr.owner().unwrap();
    lkr.make_commit(&owner, msg).unwrap()
}

pub fn must_touch_and_commit(lkr: &Linker, repo_path: &str, seed: u8) -> (File, Commit) {
    let file = must_touch(lkr, repo_path, seed);
    let cmt = must_commit(lkr, &format!("cmt {}", seed));
    (file, cmt)
}

pub fn must_move(lkr: &Linker, repo_path: &str, dst: &str) -> Node {
    let nd = lkr.lookup_node(repo_path).unwrap();
    coreutils::move_node(lkr, &nd, dst).unwrap()
}

pub fn must_remove(lkr: &Linker, repo_path: &str) -> Ghost {
    let nd = lkr.lookup_node(repo_path).unwrap();
    let (_, ghost) = coreutils::remove(lkr, &nd, true, false).unwrap();
    ghost.unwrap()
}

pub fn content(seed: u8) -> catfs::types::Hash {
    hasher::content_hash(&[seed])
}
