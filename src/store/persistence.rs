//! Persistence layer backed by sled

use crate::error::StoreError;
use crate::store::{key_has_prefix, KvBackend, Write};
use std::path::Path;

/// Sled-based implementation of KvBackend
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open (or create) a sled database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open sled database: {}", e)))?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

fn decode_key(raw: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| StoreError::Codec(format!("Non utf-8 key in database: {}", e)))
}

impl KvBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Failed to get key {}: {}", key, e)))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(prefix.trim_end_matches('/').as_bytes()) {
            let (raw, _) = item
                .map_err(|e| StoreError::Backend(format!("Failed to scan keys: {}", e)))?;
            let key = decode_key(&raw)?;
            if key_has_prefix(&key, prefix) {
                keys.push(key);
            }
        }

        Ok(keys)
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            match value {
                Some(value) => batch.insert(key.as_bytes(), value),
                None => batch.remove(key.as_bytes()),
            }
        }

        self.db
            .apply_batch(batch)
            .map_err(|e| StoreError::Backend(format!("Failed to apply batch: {}", e)))?;
        self.flush()
    }
}
