//! Replica registry: the single source of truth for "who holds what".
//!
//! In-memory `key -> ReplicaRecord` map; every mutation persists the
//! durable portion of the record (everything except the volatile strength)
//! to the `data_info` table.

use crate::record::ReplicaRecord;
use std::collections::HashMap;
use tide_common::ReplError;
use tide_storage::engine::StorageError;
use tide_storage::{FsyncPolicy, StorageEngine};

#[derive(Debug)]
pub struct ReplicaRegistry {
    records: HashMap<String, ReplicaRecord>,
    engine: StorageEngine,
}

impl ReplicaRegistry {
    /// Open the `data_info` table under `data_dir` and rebuild the
    /// in-memory map. Recovered records restart with zero strength.
    pub fn open(data_dir: &std::path::Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        let engine = StorageEngine::open(data_dir, "data_info", fsync)?;

        let mut records = HashMap::new();
        for stored in engine.records() {
            match ReplicaRecord::from_blob(stored.key.clone(), &stored.blob) {
                Ok(record) => {
                    records.insert(stored.key.clone(), record);
                }
                Err(e) => {
                    tracing::warn!("skipping undecodable replica record '{}': {}", stored.key, e);
                }
            }
        }

        Ok(Self { records, engine })
    }

    /// Insert a record for a new key.
    pub fn create(&mut self, record: ReplicaRecord) -> Result<(), ReplError> {
        if self.records.contains_key(&record.key) {
            return Err(ReplError::AlreadyExists);
        }
        self.persist(&record)?;
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    pub fn read(&self, key: &str) -> Option<&ReplicaRecord> {
        self.records.get(key)
    }

    pub fn read_cloned(&self, key: &str) -> Option<ReplicaRecord> {
        self.records.get(key).cloned()
    }

    /// Replace the record for an existing key.
    pub fn update(&mut self, record: ReplicaRecord) -> Result<(), ReplError> {
        if !self.records.contains_key(&record.key) {
            return Err(ReplError::NotFound);
        }
        self.persist(&record)?;
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    /// Insert-or-replace (used by inbound replica pushes).
    pub fn upsert(&mut self, record: ReplicaRecord) -> Result<(), ReplError> {
        self.persist(&record)?;
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    /// Remove a record. Removing an absent key is not an error.
    pub fn remove(&mut self, key: &str) -> Result<(), ReplError> {
        self.engine
            .remove(key)
            .map_err(|e| ReplError::Backend(e.to_string()))?;
        self.records.remove(key);
        Ok(())
    }

    /// Number of keys known to this DC.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of keys currently replicated here.
    pub fn replicated_count(&self) -> usize {
        self.records.values().filter(|r| r.replicated).count()
    }

    /// All records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &ReplicaRecord> {
        self.records.values()
    }

    fn persist(&mut self, record: &ReplicaRecord) -> Result<(), ReplError> {
        self.engine
            .put(&record.key, record.to_blob())
            .map_err(|e| ReplError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{StrategyKind, StrategyParams};
    use tempfile::TempDir;
    use tide_common::{DcId, UpdateStamp};

    fn record(key: &str) -> ReplicaRecord {
        ReplicaRecord::created_here(
            key.to_string(),
            DcId::new("dc-a"),
            StrategyKind::AdaptiveDecay,
            StrategyParams::default(),
            UpdateStamp::zero(DcId::new("dc-a")),
        )
    }

    #[test]
    fn test_create_read() {
        let dir = TempDir::new().unwrap();
        let mut rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::None).unwrap();

        rr.create(record("k1")).unwrap();
        assert!(rr.read("k1").unwrap().replicated);
        assert!(rr.read("missing").is_none());
        assert_eq!(rr.len(), 1);
        assert_eq!(rr.replicated_count(), 1);
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let dir = TempDir::new().unwrap();
        let mut rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::None).unwrap();

        rr.create(record("k1")).unwrap();
        assert!(matches!(
            rr.create(record("k1")),
            Err(ReplError::AlreadyExists)
        ));
    }

    #[test]
    fn test_update_requires_existing() {
        let dir = TempDir::new().unwrap();
        let mut rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::None).unwrap();

        assert!(matches!(rr.update(record("k1")), Err(ReplError::NotFound)));

        rr.create(record("k1")).unwrap();
        let mut rec = rr.read_cloned("k1").unwrap();
        rec.dcs.insert(DcId::new("dc-b"));
        rr.update(rec).unwrap();
        assert_eq!(rr.read("k1").unwrap().dcs.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::None).unwrap();

        rr.create(record("k1")).unwrap();
        rr.remove("k1").unwrap();
        rr.remove("k1").unwrap();
        assert!(rr.is_empty());
    }

    #[test]
    fn test_records_survive_reopen_without_strength() {
        let dir = TempDir::new().unwrap();
        {
            let mut rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::Always).unwrap();
            let mut rec = record("k1");
            rec.strength = 175.0;
            rec.dcs.insert(DcId::new("dc-b"));
            rr.create(rec).unwrap();
        }

        let rr = ReplicaRegistry::open(dir.path(), FsyncPolicy::Always).unwrap();
        let rec = rr.read("k1").unwrap();
        assert_eq!(rec.strength, 0.0, "strength is volatile across restarts");
        assert!(rec.replicated);
        assert!(rec.dcs.contains(&DcId::new("dc-b")));
    }
}
