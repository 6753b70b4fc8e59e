//! Configuration driving storage and logging

use catfs::config::{CatfsConfig, ConfigLoader, StorageBackend, CONFIG_FILE_NAME};
use catfs::logging::{init_logging, LogOutput, LoggingConfig};
use catfs::vcs::ConflictStrategy;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_repository_config_opens_sled_store() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join(CONFIG_FILE_NAME),
        r#"
[storage]
backend = "sled"
path = "state/db"

[sync]
conflict_strategy = "ignore"
"#,
    )
    .unwrap();

    let cfg = ConfigLoader::new(root.path()).global_file(None).load().unwrap();
    assert_eq!(cfg.storage.backend, StorageBackend::Sled);
    assert_eq!(cfg.sync.conflict_strategy, ConflictStrategy::Ignore);

    {
        let lkr = cfg.open_linker(root.path()).unwrap();
        lkr.set_owner("alice").unwrap();
        lkr.make_commit("alice", "init").unwrap();
    }

    assert!(root.path().join("state/db").exists());
    let lkr = cfg.open_linker(root.path()).unwrap();
    assert_eq!(lkr.head().unwrap().message(), "init");
}

#[test]
fn test_memory_backend_starts_empty() {
    let root = TempDir::new().unwrap();
    let mut cfg = CatfsConfig::default();
    cfg.storage.backend = StorageBackend::Memory;

    let lkr = cfg.open_linker(root.path()).unwrap();
    assert!(lkr.head().unwrap_err().is_no_such_ref());
    assert!(!root.path().join(".catfs").exists());
}

#[test]
fn test_logging_to_file() {
    let dir = TempDir::new().unwrap();
    let log_file = dir.path().join("logs").join("catfs.log");
    let cfg = LoggingConfig {
        output: LogOutput::File,
        file: log_file.clone(),
        color: false,
        ..Default::default()
    };

    init_logging(Some(&cfg)).unwrap();
    tracing::info!(marker = 1, "logging to file works");

    let written = fs::read_to_string(&log_file).unwrap();
    assert!(written.contains("logging to file works"));

    // The global subscriber can only be installed once.
    assert!(init_logging(Some(&cfg)).is_err());
}
