//! In-memory key-value backend

use crate::error::StoreError;
use crate::store::{key_has_prefix, KvBackend, Write};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// `BTreeMap` backed store; contents vanish with the process
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read();
        let start = prefix.trim_end_matches('/').to_string();
        Ok(data
            .range(start..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix.trim_end_matches('/')))
            .filter(|key| key_has_prefix(key, prefix))
            .cloned()
            .collect())
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for (key, value) in writes {
            match value {
                Some(value) => data.insert(key, value),
                None => data.remove(&key),
            };
        }

        Ok(())
    }
}
