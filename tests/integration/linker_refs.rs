//! Commits, refs, checkout and persistence of the linker

use super::test_utils::*;
use catfs::linker::{coreutils, Linker};
use catfs::store::{Database, SledBackend};
use catfs::CatfsError;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_log_lists_commits_newest_first() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_touch_and_commit(lkr, "/x", 2);

        let mut messages = Vec::new();
        coreutils::log(lkr, &lkr.head().unwrap(), |cmt| {
            messages.push(cmt.message().to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(messages, vec!["cmt 2", "cmt 1", "init"]);
    });
}

#[test]
fn test_commit_by_index() {
    with_dummy_linker(|lkr| {
        let (_, c1) = must_touch_and_commit(lkr, "/x", 1);
        assert_eq!(
            lkr.commit_by_index(c1.index()).unwrap().tree_hash(),
            c1.tree_hash()
        );
        assert_eq!(
            lkr.commit_by_index(c1.index() + 1).unwrap().tree_hash(),
            lkr.status().unwrap().tree_hash()
        );
        assert!(matches!(
            lkr.commit_by_index(c1.index() + 100),
            Err(CatfsError::NoSuchCommitIndex(_))
        ));
    });
}

#[test]
fn test_checkout_then_commit_reverts() {
    with_dummy_linker(|lkr| {
        let (_, c1) = must_touch_and_commit(lkr, "/x", 1);
        must_touch_and_commit(lkr, "/x", 2);

        lkr.checkout_commit(&c1, false).unwrap();
        assert_eq!(lkr.lookup_file("/x").unwrap().content_hash(), content(1));
        assert!(lkr.have_staged_changes().unwrap());

        let revert = must_commit(lkr, "revert");
        assert_eq!(revert.root(), c1.root());
        assert_eq!(lkr.resolve_commit("head^").unwrap().message(), "cmt 2");
    });
}

#[test]
fn test_commit_without_changes_fails() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        let err = lkr.make_commit("alice", "again").unwrap_err();
        assert!(matches!(err, CatfsError::NoChange));
    });
}

#[test]
fn test_custom_refs() {
    with_dummy_linker(|lkr| {
        let (_, c1) = must_touch_and_commit(lkr, "/x", 1);
        lkr.save_ref("release", &catfs::nodes::Node::Commit(c1.clone()))
            .unwrap();
        must_touch_and_commit(lkr, "/x", 2);

        assert_eq!(lkr.resolve_commit("release").unwrap().tree_hash(), c1.tree_hash());
        assert!(lkr.list_refs().unwrap().contains(&"release".to_string()));

        lkr.remove_ref("release").unwrap();
        assert!(lkr.resolve_ref("release").unwrap_err().is_no_such_ref());
    });
}

#[test]
fn test_sled_repository_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let open = || {
        let backend = SledBackend::new(dir.path()).unwrap();
        Linker::new(Arc::new(Database::new(Box::new(backend))))
    };

    let head = {
        let lkr = open();
        lkr.set_owner("alice").unwrap();
        must_touch(&lkr, "/dir/x", 5);
        let head = must_commit(&lkr, "first");
        must_move(&lkr, "/dir/x", "/y");
        head
    };

    let lkr = open();
    assert_eq!(lkr.owner().unwrap(), "alice");
    assert_eq!(lkr.head().unwrap().tree_hash(), head.tree_hash());

    // Staged changes are persisted too.
    let y = lkr.lookup_file("/y").unwrap();
    assert_eq!(y.content_hash(), content(5));
    assert!(lkr.lookup_node("/dir/x").unwrap().is_ghost());
}
