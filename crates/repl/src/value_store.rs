//! Value store: the DC-local cache of replicated values.
//!
//! A thin keyed mapping over the durable `data_item` table. All
//! replication semantics are imposed by the replica manager; this layer is
//! a plain upsert/lookup/remove store.

use tide_storage::engine::StorageError;
use tide_storage::{FsyncPolicy, StorageEngine};

#[derive(Debug)]
pub struct ValueStore {
    engine: StorageEngine,
}

impl ValueStore {
    /// Open the `data_item` table under `data_dir`.
    pub fn open(data_dir: &std::path::Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        let engine = StorageEngine::open(data_dir, "data_item", fsync)?;
        Ok(Self { engine })
    }

    /// Unconditional upsert.
    pub fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.engine.put(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.engine.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.engine.contains(key)
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        self.engine.remove(key)
    }

    /// Number of values held locally.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }
}
