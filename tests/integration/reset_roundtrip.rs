//! Resetting and undeleting single paths

use super::test_utils::*;
use catfs::vcs::{reset_node, undelete};

#[test]
fn test_reset_reproduces_committed_file() {
    with_dummy_linker(|lkr| {
        let (file, c1) = must_touch_and_commit(lkr, "/photos/x.png", 9);
        must_touch_and_commit(lkr, "/photos/x.png", 10);

        reset_node(lkr, &c1, "/photos/x.png", false).unwrap();

        let restored = lkr.lookup_file("/photos/x.png").unwrap();
        assert_eq!(restored.content_hash(), file.content_hash());
        assert_eq!(restored.size(), file.size());
        assert!(lkr.have_staged_changes().unwrap());
    });
}

#[test]
fn test_reset_directory() {
    with_dummy_linker(|lkr| {
        must_touch(lkr, "/d/a", 1);
        must_touch(lkr, "/d/b", 2);
        let c1 = must_commit(lkr, "both");

        must_remove(lkr, "/d/b");
        must_touch(lkr, "/d/a", 3);
        must_commit(lkr, "change");

        reset_node(lkr, &c1, "/d", false).unwrap();
        assert_eq!(lkr.lookup_file("/d/a").unwrap().content_hash(), content(1));
        assert_eq!(lkr.lookup_file("/d/b").unwrap().content_hash(), content(2));

        let after = must_commit(lkr, "reset");
        assert_eq!(
            lkr.lookup_node_at(&after, "/d").unwrap().content_hash(),
            lkr.lookup_node_at(&c1, "/d").unwrap().content_hash()
        );
    });
}

#[test]
fn test_undelete_after_commit() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 4);
        must_remove(lkr, "/x");
        must_commit(lkr, "remove");

        undelete(lkr, "/x").unwrap();
        let x = lkr.lookup_file("/x").unwrap();
        assert_eq!(x.content_hash(), content(4));
        assert_eq!(x.size(), 4);
    });
}
