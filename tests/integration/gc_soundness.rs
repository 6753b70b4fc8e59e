//! Garbage collection never touches reachable nodes

use super::test_utils::*;
use catfs::linker::{GarbageCollector, Linker};
use catfs::nodes::{walk, Node, WalkControl};
use catfs::types::Hash;

fn reachable_from_head(lkr: &Linker) -> Vec<Hash> {
    let head = lkr.head().unwrap();
    let root = lkr.directory_by_hash(&head.root()).unwrap().unwrap();

    let mut hashes = Vec::new();
    walk(lkr, &Node::Directory(root), true, &mut |nd| {
        hashes.push(nd.tree_hash());
        Ok(WalkControl::Continue)
    })
    .unwrap();
    hashes
}

#[test]
fn test_full_gc_keeps_everything_reachable() {
    with_dummy_linker(|lkr| {
        must_touch(lkr, "/a/b/c", 1);
        must_touch(lkr, "/a/d", 2);
        must_touch(lkr, "/e", 3);
        must_commit(lkr, "tree");
        must_move(lkr, "/e", "/a/e");
        must_commit(lkr, "move");

        let expected = reachable_from_head(lkr);
        GarbageCollector::new(lkr, None).run(true).unwrap();
        lkr.mem_index_clear();

        for hash in expected {
            assert!(lkr.node_by_hash(&hash).unwrap().is_some(), "lost {}", hash);
        }
        assert_eq!(lkr.lookup_file("/a/e").unwrap().content_hash(), content(3));
    });
}

#[test]
fn test_uncommitted_versions_are_collected() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_touch(lkr, "/x", 2);
        must_touch(lkr, "/x", 3);

        let removed = GarbageCollector::new(lkr, None).run(false).unwrap();
        assert!(removed > 0);

        lkr.mem_index_clear();
        assert_eq!(lkr.lookup_file("/x").unwrap().content_hash(), content(3));
        let head = lkr.head().unwrap();
        assert_eq!(lkr.lookup_node_at(&head, "/x").unwrap().content_hash(), content(1));
    });
}
