//! History walking across modifications, moves and removals

use super::test_utils::*;
use catfs::vcs::{history, Change, ChangeType};

fn masks(states: &[Change]) -> Vec<ChangeType> {
    states.iter().map(|s| s.mask).collect()
}

fn paths(states: &[Change]) -> Vec<String> {
    states.iter().map(|s| s.curr.path()).collect()
}

#[test]
fn test_move_is_detected() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_move(lkr, "/x", "/y");
        let head = must_commit(lkr, "move");

        let y = lkr.lookup_node("/y").unwrap();
        let states = history(lkr, &y, &head, None).unwrap();

        assert_eq!(
            masks(&states),
            vec![ChangeType::NONE, ChangeType::MOVE, ChangeType::ADD]
        );
        assert_eq!(paths(&states), vec!["/y", "/x", "/x"]);
    });
}

#[test]
fn test_add_modify_move() {
    with_dummy_linker(|lkr| {
        let (_, c1) = must_touch_and_commit(lkr, "/x.png", 1);
        let (_, c2) = must_touch_and_commit(lkr, "/x.png", 2);
        must_move(lkr, "/x.png", "/y.png");
        let c3 = must_commit(lkr, "move");

        let y = lkr.lookup_node("/y.png").unwrap();
        let states = history(lkr, &y, &c3, None).unwrap();

        assert_eq!(
            masks(&states),
            vec![
                ChangeType::NONE,
                ChangeType::MOVE,
                ChangeType::MODIFY,
                ChangeType::ADD
            ]
        );
        assert_eq!(paths(&states), vec!["/y.png", "/x.png", "/x.png", "/x.png"]);

        let heads: Vec<_> = states.iter().map(|s| s.head.tree_hash()).collect();
        assert_eq!(
            heads,
            vec![c3.tree_hash(), c2.tree_hash(), c1.tree_hash(), c1.tree_hash()]
        );
        assert_eq!(states[1].curr.content_hash(), content(2));
        assert_eq!(states[2].curr.content_hash(), content(1));
        assert_eq!(states[0].was_previously_at.as_deref(), Some("/x.png"));
    });
}

#[test]
fn test_removed_node_history() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_remove(lkr, "/x");
        let head = must_commit(lkr, "remove");

        let ghost = lkr.lookup_node("/x").unwrap();
        assert!(ghost.is_ghost());

        let states = history(lkr, &ghost, &head, None).unwrap();
        assert!(states[0].curr.is_ghost());
        assert_eq!(states[0].moved_to, None);
        assert_eq!(states[1].mask, ChangeType::REMOVE);
        assert!(!states[1].curr.is_ghost());
        assert_eq!(states.last().unwrap().mask, ChangeType::ADD);
    });
}

#[test]
fn test_history_of_staged_changes() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_touch(lkr, "/x", 2);

        let x = lkr.lookup_node("/x").unwrap();
        let states = history(lkr, &x, &lkr.status().unwrap(), None).unwrap();

        assert_eq!(
            masks(&states),
            vec![ChangeType::NONE, ChangeType::MODIFY, ChangeType::ADD]
        );
        assert_eq!(states[0].curr.content_hash(), content(2));
    });
}

#[test]
fn test_directory_moved_before_first_commit() {
    with_dummy_linker(|lkr| {
        let init = lkr.head().unwrap();
        must_touch(lkr, "/d/x", 1);
        must_move(lkr, "/d", "/e");
        let head = must_commit(lkr, "move d");

        let x = lkr.lookup_node("/e/x").unwrap();
        let states = history(lkr, &x, &head, None).unwrap();
        assert_eq!(
            masks(&states),
            vec![ChangeType::NONE, ChangeType::MOVE, ChangeType::ADD]
        );
        assert_eq!(paths(&states), vec!["/e/x", "/d/x", "/d/x"]);
        assert_eq!(states[0].was_previously_at.as_deref(), Some("/d/x"));
        assert_eq!(states[1].head.tree_hash(), init.tree_hash());

        // Same answer from a linker that only knows the store.
        let reloaded = catfs::linker::Linker::new(lkr.kv_handle());
        let x = reloaded.lookup_node("/e/x").unwrap();
        let states = history(&reloaded, &x, &head, None).unwrap();
        assert_eq!(paths(&states), vec!["/e/x", "/d/x", "/d/x"]);
    });
}
