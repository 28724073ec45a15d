//! Storage engine: combines WAL + in-memory table for one logical table.
//!
//! All writes go through the WAL first (for durability), then into the
//! table (for fast reads). Operations are synchronous (blocking I/O); the
//! async boundary is at the caller.

use crate::record::StoreRecord;
use crate::table::Table;
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One durable table: `data_item` holds value blobs, `data_info` holds
/// serialized replica records. Each gets its own engine and WAL file.
#[derive(Debug)]
pub struct StorageEngine {
    table: Table,
    wal: Wal,
}

impl StorageEngine {
    /// Open or create the named table under `data_dir` (WAL at
    /// `data_dir/<name>.wal`), replaying any existing log.
    pub fn open(data_dir: &Path, name: &str, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join(format!("{name}.wal"));

        let mut table = Table::new();
        for record in Wal::replay(&wal_path)? {
            table.apply_replayed(record);
        }

        let wal = Wal::open(&wal_path, fsync)?;

        tracing::info!(
            "table '{}' opened: {} key(s) recovered from {:?}",
            name,
            table.len(),
            wal_path
        );

        Ok(Self { table, wal })
    }

    /// Get the blob for a key.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.table.get(key).map(|r| r.blob.as_slice())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains(key)
    }

    /// Upsert a blob: WAL first, then table.
    pub fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), StorageError> {
        let record = StoreRecord::new(key.to_string(), blob);
        self.wal.append(&record)?;
        self.table.put(record);
        Ok(())
    }

    /// Remove a key. Writes a tombstone to the WAL. Returns whether the
    /// key was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        let record = StoreRecord::tombstone(key.to_string());
        self.wal.append(&record)?;
        Ok(self.table.remove(key).is_some())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All live records (used to rebuild in-memory state at startup).
    pub fn records(&self) -> impl Iterator<Item = &StoreRecord> {
        self.table.records()
    }

    /// Sync the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_engine_put_get() {
        let dir = TempDir::new().unwrap();
        let mut engine = StorageEngine::open(dir.path(), "data_item", FsyncPolicy::None).unwrap();

        engine.put("k1", b"v1".to_vec()).unwrap();
        assert_eq!(engine.get("k1"), Some(b"v1".as_slice()));
        assert!(engine.get("missing").is_none());
        assert!(engine.contains("k1"));
    }

    #[test]
    fn test_engine_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut engine = StorageEngine::open(dir.path(), "data_item", FsyncPolicy::None).unwrap();

        engine.put("k1", b"v1".to_vec()).unwrap();
        engine.put("k1", b"v2".to_vec()).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get("k1"), Some(b"v2".as_slice()));
    }

    #[test]
    fn test_engine_remove() {
        let dir = TempDir::new().unwrap();
        let mut engine = StorageEngine::open(dir.path(), "data_item", FsyncPolicy::None).unwrap();

        engine.put("k1", b"v1".to_vec()).unwrap();
        assert!(engine.remove("k1").unwrap());
        assert!(!engine.remove("k1").unwrap());
        assert!(engine.get("k1").is_none());
    }

    #[test]
    fn test_engine_recovers_across_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let mut engine =
                StorageEngine::open(dir.path(), "data_item", FsyncPolicy::Always).unwrap();
            engine.put("k1", b"v1".to_vec()).unwrap();
            engine.put("k2", b"v2".to_vec()).unwrap();
            engine.remove("k1").unwrap();
        }

        let engine = StorageEngine::open(dir.path(), "data_item", FsyncPolicy::Always).unwrap();
        assert_eq!(engine.len(), 1);
        assert!(engine.get("k1").is_none(), "tombstone survives reopen");
        assert_eq!(engine.get("k2"), Some(b"v2".as_slice()));
    }

    #[test]
    fn test_engine_tables_are_isolated() {
        let dir = TempDir::new().unwrap();
        let mut items = StorageEngine::open(dir.path(), "data_item", FsyncPolicy::None).unwrap();
        let mut infos = StorageEngine::open(dir.path(), "data_info", FsyncPolicy::None).unwrap();

        items.put("k1", b"blob".to_vec()).unwrap();
        infos.put("k1", b"meta".to_vec()).unwrap();

        assert_eq!(items.get("k1"), Some(b"blob".as_slice()));
        assert_eq!(infos.get("k1"), Some(b"meta".as_slice()));

        items.remove("k1").unwrap();
        assert!(infos.contains("k1"), "removing from one table leaves the other");
    }
}
