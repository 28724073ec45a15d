//! Replica registry record: per-key replication metadata at one DC.

use crate::params::{StrategyKind, StrategyParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tide_common::{DcId, UpdateStamp};

/// Everything this DC knows about one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaRecord {
    pub key: String,
    /// True iff this DC currently holds the value in the value store.
    pub replicated: bool,
    /// Volatile access-pressure score, clamped to `[0, max_strength]`.
    /// Not persisted; rebuilt from zero after a restart.
    pub strength: f64,
    /// Which policy variant governs this key.
    pub kind: StrategyKind,
    pub params: StrategyParams,
    /// DCs known to hold a replica, including self iff `replicated`.
    pub dcs: BTreeSet<DcId>,
    /// Stamp of the most recent applied update (last-writer-wins).
    pub last_update: UpdateStamp,
}

impl ReplicaRecord {
    /// Record for a key created locally: this DC is the sole replica and
    /// strength starts at the admission threshold.
    pub fn created_here(
        key: String,
        local: DcId,
        kind: StrategyKind,
        params: StrategyParams,
        stamp: UpdateStamp,
    ) -> Self {
        let strength = params.repl_threshold;
        let mut dcs = BTreeSet::new();
        dcs.insert(local);
        Self {
            key,
            replicated: true,
            strength,
            kind,
            params,
            dcs,
            last_update: stamp,
        }
    }

    /// Non-replicated stub for a key first learned about via gossip.
    pub fn remote_stub(
        key: String,
        holder: DcId,
        kind: StrategyKind,
        params: StrategyParams,
    ) -> Self {
        let mut dcs = BTreeSet::new();
        dcs.insert(holder.clone());
        Self {
            key,
            replicated: false,
            strength: 0.0,
            kind,
            params,
            dcs,
            last_update: UpdateStamp::zero(holder),
        }
    }

    /// Serialize the durable portion of this record (strength is volatile).
    pub fn to_blob(&self) -> Vec<u8> {
        let persisted = PersistedRecord {
            replicated: self.replicated,
            kind: self.kind,
            params: self.params.clone(),
            dcs: self.dcs.clone(),
            last_update: self.last_update.clone(),
        };
        serde_json::to_vec(&persisted).expect("replica record serializes")
    }

    /// Rebuild a record from its durable form. Strength restarts at zero.
    pub fn from_blob(key: String, blob: &[u8]) -> Result<Self, serde_json::Error> {
        let persisted: PersistedRecord = serde_json::from_slice(blob)?;
        Ok(Self {
            key,
            replicated: persisted.replicated,
            strength: 0.0,
            kind: persisted.kind,
            params: persisted.params,
            dcs: persisted.dcs,
            last_update: persisted.last_update,
        })
    }
}

/// Durable form of a `ReplicaRecord` (the `data_info` table layout).
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    replicated: bool,
    kind: StrategyKind,
    params: StrategyParams,
    dcs: BTreeSet<DcId>,
    last_update: UpdateStamp,
}
