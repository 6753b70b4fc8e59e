//! Error types for the catfs metadata core.

use crate::types::Hash;
use thiserror::Error;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Errors surfaced by the linker, the node model and the sync engine
#[derive(Debug, Error)]
pub enum CatfsError {
    #[error("No such file or directory: {0}")]
    NoSuchFile(String),

    #[error("No such ref: {0}")]
    NoSuchRef(String),

    #[error("No such hash: {0}")]
    NoSuchHash(Hash),

    #[error("No commit with index {0}")]
    NoSuchCommitIndex(u64),

    #[error("Bad node: {0}")]
    BadNode(String),

    #[error("Malformed move mapping line: {0}")]
    MalformedMoveLine(String),

    #[error("Nothing changed between the given versions")]
    NoChange,

    #[error("Refusing to overwrite staged changes (use force)")]
    StageNotEmpty,

    #[error("Node is already removed: {0}")]
    IsGhost(String),

    #[error("Ambiguous revision: {0}")]
    AmbiguousRev(String),

    #[error("File exists: {0}")]
    Exists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CatfsError {
    pub fn is_no_such_file(&self) -> bool {
        matches!(self, CatfsError::NoSuchFile(_))
    }

    pub fn is_no_such_ref(&self) -> bool {
        matches!(self, CatfsError::NoSuchRef(_))
    }

    /// Shorthand for a `BadNode` error with a formatted reason
    pub fn bad_node(reason: impl Into<String>) -> Self {
        CatfsError::BadNode(reason.into())
    }
}

impl From<config::ConfigError> for CatfsError {
    fn from(err: config::ConfigError) -> Self {
        CatfsError::Config(err.to_string())
    }
}

impl From<bincode::Error> for CatfsError {
    fn from(err: bincode::Error) -> Self {
        CatfsError::Store(StoreError::from(err))
    }
}

/// Crate-wide result alias
pub type Result<T, E = CatfsError> = std::result::Result<T, E>;
