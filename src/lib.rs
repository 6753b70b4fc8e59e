//! catfs: metadata core of a content-addressed, versioned filesystem
//!
//! Files, directories and commits form a Merkle tree stored in a key-value
//! store. The [`linker::Linker`] stages changes, makes commits and tracks
//! moves; [`vcs`] walks history and synchronises two repositories.

pub mod config;
pub mod error;
pub mod linker;
pub mod logging;
pub mod nodes;
pub mod store;
pub mod trie;
pub mod types;
pub mod vcs;

pub use error::{CatfsError, Result};
pub use linker::Linker;
