//! Integration tests for catfs

mod config_storage;
mod gc_soundness;
mod history_vectors;
mod linker_refs;
mod move_mapping;
mod reset_roundtrip;
mod sync_scenarios;
mod test_utils;
