//! Move ledger as seen through finalized commits

use super::test_utils::*;
use catfs::linker::MoveDir;

#[test]
fn test_mapping_is_bidirectional_after_commit() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_move(lkr, "/x", "/y");
        let cmt = must_commit(lkr, "move");

        let y = lkr.lookup_node_at(&cmt, "/y").unwrap();
        let ghost = lkr.lookup_node_at(&cmt, "/x").unwrap();
        assert!(ghost.is_ghost());

        let (src, dir) = lkr.move_mapping(Some(&cmt), &y).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
        assert_eq!(src.path(), "/x");

        let (dst, dir) = lkr.move_mapping(Some(&cmt), &ghost).unwrap().unwrap();
        assert_eq!(dir, MoveDir::DstToSrc);
        assert_eq!(dst.path(), "/y");
        assert_eq!(dst.tree_hash(), y.tree_hash());
    });
}

#[test]
fn test_old_commits_keep_their_moves() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/x", 1);
        must_move(lkr, "/x", "/y");
        let move_cmt = must_commit(lkr, "move");
        must_touch_and_commit(lkr, "/y", 2);

        let old_y = lkr.lookup_node_at(&move_cmt, "/y").unwrap();
        assert_eq!(old_y.content_hash(), content(1));

        let (src, dir) = lkr.move_mapping(Some(&move_cmt), &old_y).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
        assert_eq!(src.path(), "/x");
    });
}

#[test]
fn test_unmoved_node_has_no_mapping() {
    with_dummy_linker(|lkr| {
        let (_, cmt) = must_touch_and_commit(lkr, "/x", 1);
        let x = lkr.lookup_node_at(&cmt, "/x").unwrap();
        assert!(lkr.move_mapping(Some(&cmt), &x).unwrap().is_none());
        assert!(lkr.move_entry_point(&x).unwrap().is_none());
    });
}

#[test]
fn test_staged_move_of_directory() {
    with_dummy_linker(|lkr| {
        must_touch_and_commit(lkr, "/dir/x", 1);
        must_move(lkr, "/dir", "/other");

        let other = lkr.lookup_node("/other").unwrap();
        let (src, dir) = lkr.move_mapping(None, &other).unwrap().unwrap();
        assert_eq!(dir, MoveDir::SrcToDst);
        assert_eq!(src.path(), "/dir");
        assert!(lkr.lookup_node("/dir").unwrap().is_ghost());
        assert_eq!(lkr.lookup_file("/other/x").unwrap().content_hash(), content(1));
    });
}
