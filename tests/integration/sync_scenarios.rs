//! End to end syncs between two independent repositories

use super::test_utils::*;
use catfs::linker::Linker;
use catfs::vcs::{diff, sync, SyncConfig};

fn must_sync(src: &Linker, dst: &Linker) -> bool {
    sync(src, dst, &SyncConfig::default()).unwrap().is_some()
}

#[test]
fn test_sync_basic_src_file() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 1);
        assert!(must_sync(src, dst));

        let x = dst.lookup_file("/x.png").unwrap();
        assert_eq!(x.content_hash(), content(1));
        assert_eq!(x.size(), 1);

        let head = dst.head().unwrap();
        assert_eq!(head.author(), "src");
        let marker = head.merge_marker().unwrap();
        assert_eq!(marker.with, "src");
        assert_eq!(marker.head, src.head().unwrap().tree_hash());
    });
}

#[test]
fn test_sync_keeps_dst_only_file() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(dst, "/mine.png", 1);
        assert!(!must_sync(src, dst));
        assert_eq!(dst.lookup_file("/mine.png").unwrap().content_hash(), content(1));
    });
}

#[test]
fn test_sync_both_equal_no_conflict() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 1);
        must_touch_and_commit(dst, "/x.png", 1);

        assert!(!must_sync(src, dst));
        assert!(dst.lookup_node("/x.png.conflict.0").is_err());
    });
}

#[test]
fn test_sync_both_conflict() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 23);
        must_touch_and_commit(dst, "/x.png", 42);

        let pending = diff(src, dst, None, None, &SyncConfig::default()).unwrap();
        assert_eq!(pending.conflict.len(), 1);

        assert!(must_sync(src, dst));
        assert_eq!(dst.lookup_file("/x.png").unwrap().content_hash(), content(42));
        assert_eq!(
            dst.lookup_file("/x.png.conflict.0").unwrap().content_hash(),
            content(23)
        );
    });
}

#[test]
fn test_sync_src_remove_leaves_ghost() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 1);
        assert!(must_sync(src, dst));

        must_remove(src, "/x.png");
        must_commit(src, "remove");
        assert!(must_sync(src, dst));

        assert!(dst.lookup_node("/x.png").unwrap().is_ghost());
    });
}

#[test]
fn test_sync_src_remove_with_ignore_deletes() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 1);
        assert!(must_sync(src, dst));

        must_remove(src, "/x.png");
        must_commit(src, "remove");

        let cfg = SyncConfig {
            ignore_deletes: true,
            ..Default::default()
        };
        sync(src, dst, &cfg).unwrap();
        assert!(!dst.lookup_node("/x.png").unwrap().is_ghost());
    });
}

#[test]
fn test_sync_follows_remote_move() {
    with_linker_pair(|src, dst| {
        must_touch_and_commit(src, "/x.png", 1);
        assert!(must_sync(src, dst));

        must_move(src, "/x.png", "/y.png");
        must_commit(src, "move");
        assert!(must_sync(src, dst));

        assert_eq!(dst.lookup_file("/y.png").unwrap().content_hash(), content(1));
        assert!(dst.lookup_node("/x.png").unwrap().is_ghost());
    });
}

#[test]
fn test_sync_is_idempotent() {
    with_linker_pair(|src, dst| {
        must_touch(src, "/a/x.png", 1);
        must_touch(src, "/a/b/y.png", 2);
        must_touch_and_commit(src, "/z.png", 3);
        must_touch_and_commit(dst, "/z.png", 4);

        assert!(must_sync(src, dst));
        assert!(!must_sync(src, dst));

        let pending = diff(src, dst, None, None, &SyncConfig::default()).unwrap();
        assert!(pending.added.is_empty());
        assert!(pending.merged.is_empty());
        assert_eq!(dst.lookup_file("/a/b/y.png").unwrap().content_hash(), content(2));
    });
}

#[test]
fn test_sync_directory_moved_before_first_commit() {
    with_linker_pair(|src, dst| {
        must_touch(src, "/d/x", 1);
        must_move(src, "/d", "/e");
        must_commit(src, "move d");
        must_touch_and_commit(dst, "/e/x", 2);

        assert!(must_sync(src, dst));
        assert_eq!(dst.lookup_file("/e/x").unwrap().content_hash(), content(2));
        assert_eq!(
            dst.lookup_file("/e/x.conflict.0").unwrap().content_hash(),
            content(1)
        );
    });
}
