//! Version control on top of the linker: node histories, pairing of two
//! trees, conflict detection, sync, diff, patches and single path resets.

pub mod change;
pub mod diff;
pub mod history;
pub mod mapper;
pub mod patch;
pub mod reset;
pub mod resolve;
pub mod sync;

pub use change::{combine_changes, Change, ChangeType};
pub use diff::{diff, Diff, DiffPair};
pub use history::{history, HistoryWalker};
pub use mapper::{MapPair, Mapper};
pub use patch::{apply_patch, make_patch, Patch};
pub use reset::{reset_node, undelete};
pub use resolve::{Executor, Resolver};
pub use sync::{sync, ConflictStrategy, SyncConfig, Syncer};
