//! Key-value store
//!
//! The linker persists everything as `/`-joined string keys mapping to raw
//! bytes. A [`KvBackend`] provides the raw storage; [`Database`] layers
//! re-entrant write batches on top of it. Writes made inside a batch are
//! visible to reads on the same database immediately, but only reach the
//! backend when the outermost batch is flushed.

pub mod memory;
pub mod persistence;

pub use memory::MemoryBackend;
pub use persistence::SledBackend;

use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// A single pending write; `None` marks an erase
pub type Write = (String, Option<Vec<u8>>);

/// Raw storage used by [`Database`]
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All keys equal to `prefix` or below it, lexically ordered
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Apply all writes atomically
    fn apply(&self, writes: Vec<Write>) -> Result<(), StoreError>;
}

/// Returns true if `key` is `prefix` itself or lives below it
pub fn key_has_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }

    let prefix = prefix.trim_end_matches('/');
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Default)]
struct Txn {
    depth: usize,
    pending: BTreeMap<String, Option<Vec<u8>>>,
}

/// Transactional view over a [`KvBackend`]
pub struct Database {
    backend: Box<dyn KvBackend>,
    txn: Mutex<Txn>,
}

impl Database {
    pub fn new(backend: Box<dyn KvBackend>) -> Self {
        Self {
            backend,
            txn: Mutex::new(Txn::default()),
        }
    }

    /// Database backed by an in-memory map
    pub fn memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        {
            let txn = self.txn.lock();
            if let Some(pending) = txn.pending.get(key) {
                return Ok(pending.clone());
            }
        }

        self.backend.get(key)
    }

    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// All keys at or below `prefix`, lexically ordered
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: BTreeSet<String> = self.backend.keys(prefix)?.into_iter().collect();

        let txn = self.txn.lock();
        for (key, value) in txn.pending.iter() {
            if !key_has_prefix(key, prefix) {
                continue;
            }

            match value {
                Some(_) => keys.insert(key.clone()),
                None => keys.remove(key),
            };
        }

        Ok(keys.into_iter().collect())
    }

    /// Keys starting with `prefix` that live exactly one level below the
    /// directory part of `prefix`. `glob("objects/ab")` yields every
    /// `objects/ab...` key but nothing nested deeper.
    pub fn glob(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let parent = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };

        let keys = self.keys(parent)?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| {
                let rest = if parent.is_empty() { key.as_str() } else { &key[parent.len() + 1..] };
                !rest.contains('/')
            })
            .collect())
    }

    /// Open a (possibly nested) batch
    pub fn batch(&self) -> Batch<'_> {
        self.txn.lock().depth += 1;
        Batch {
            db: self,
            finished: false,
        }
    }

    /// Serialize every key into one blob
    pub fn export(&self) -> Result<Vec<u8>, StoreError> {
        let mut dump = BTreeMap::new();
        for key in self.keys("")? {
            if let Some(value) = self.get(&key)? {
                dump.insert(key, value);
            }
        }

        Ok(bincode::serialize(&dump)?)
    }

    /// Load a blob produced by [`Database::export`], replacing all contents
    pub fn import(&self, data: &[u8]) -> Result<(), StoreError> {
        let dump: BTreeMap<String, Vec<u8>> = bincode::deserialize(data)?;
        let batch = self.batch();
        batch.clear("")?;
        for (key, value) in dump {
            batch.put(&key, value);
        }

        batch.flush()
    }
}

/// Handle on the current transaction
///
/// Dropping an unfinished batch rolls it back.
pub struct Batch<'a> {
    db: &'a Database,
    finished: bool,
}

impl<'a> Batch<'a> {
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.db
            .txn
            .lock()
            .pending
            .insert(key.to_string(), Some(value.into()));
    }

    pub fn erase(&self, key: &str) {
        self.db.txn.lock().pending.insert(key.to_string(), None);
    }

    /// Erase every key at or below `prefix`
    pub fn clear(&self, prefix: &str) -> Result<(), StoreError> {
        let keys = self.db.keys(prefix)?;
        let mut txn = self.db.txn.lock();
        for key in keys {
            txn.pending.insert(key, None);
        }

        Ok(())
    }

    pub fn have_writes(&self) -> bool {
        !self.db.txn.lock().pending.is_empty()
    }

    /// Leave this nesting level; the outermost flush writes to the backend
    pub fn flush(mut self) -> Result<(), StoreError> {
        self.finished = true;

        let writes = {
            let mut txn = self.db.txn.lock();
            txn.depth = txn.depth.saturating_sub(1);
            if txn.depth > 0 {
                return Ok(());
            }

            std::mem::take(&mut txn.pending)
        };

        if writes.is_empty() {
            return Ok(());
        }

        self.db.backend.apply(writes.into_iter().collect())
    }

    /// Discard every pending write of the whole transaction
    pub fn rollback(mut self) {
        self.finished = true;
        self.discard();
    }

    fn discard(&self) {
        let mut txn = self.db.txn.lock();
        txn.depth = txn.depth.saturating_sub(1);
        txn.pending.clear();
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
        }
    }
}
