//! Replica manager: the client-facing façade of one DC.
//!
//! Orchestrates the value store, replica registry, strategy engine and
//! inter-DC manager on every public operation, and serves the inbound
//! handlers peer DCs invoke. All mutating operations on a single key are
//! serialized through a per-key lock table; operations on different keys
//! interleave freely.
//!
//! A request cancelled mid-operation leaves already-applied side effects
//! in place; mutations are not rolled back (at-most-once is not
//! guaranteed under cancellation).

use crate::engine::StrategyEngine;
use crate::fanout::InterDcManager;
use crate::params::{StrategyKind, StrategyParams};
use crate::peer_client::PeerClient;
use crate::record::ReplicaRecord;
use crate::registry::ReplicaRegistry;
use crate::strategy::Decision;
use crate::value_store::ValueStore;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tide_common::{DcId, DcInfo, ReplError, StampClock, UpdateStamp};
use tide_storage::engine::StorageError;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

// ---------------------------------------------------------------------------
// Per-key lock table
// ---------------------------------------------------------------------------

/// Maps keys to async mutexes so the manager can linearize per-key
/// histories without serializing unrelated keys.
#[derive(Debug, Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Replica manager
// ---------------------------------------------------------------------------

/// Snapshot of one key's replication state (admin surface).
#[derive(Debug, Clone)]
pub struct KeyStatus {
    pub replicated: bool,
    pub strength: f64,
    pub dcs: Vec<DcId>,
}

/// One DC's replication controller.
///
/// Generic over `C: PeerClient` for testability: real deployment uses the
/// gRPC client from `tide-net`; unit tests use mocks.
pub struct ReplicaManager<C: PeerClient> {
    local: DcInfo,
    values: Arc<RwLock<ValueStore>>,
    registry: Arc<RwLock<ReplicaRegistry>>,
    engine: Arc<RwLock<StrategyEngine>>,
    idm: Arc<InterDcManager<C>>,
    locks: KeyLocks,
    clock: StampClock,
    default_params: StrategyParams,
}

impl<C: PeerClient> std::fmt::Debug for ReplicaManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaManager")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl<C: PeerClient> ReplicaManager<C> {
    pub fn new(
        local: DcInfo,
        values: Arc<RwLock<ValueStore>>,
        registry: Arc<RwLock<ReplicaRegistry>>,
        engine: Arc<RwLock<StrategyEngine>>,
        idm: Arc<InterDcManager<C>>,
        default_params: StrategyParams,
    ) -> Self {
        let clock = StampClock::new(local.id.clone());
        Self {
            local,
            values,
            registry,
            engine,
            idm,
            locks: KeyLocks::default(),
            clock,
            default_params,
        }
    }

    pub fn local(&self) -> &DcInfo {
        &self.local
    }

    /// Rebuild policy state after a restart. Strength is volatile, so
    /// recovered replicated keys restart at the admission threshold and
    /// remote-only keys at zero.
    pub async fn bootstrap_policies(&self) {
        let records: Vec<ReplicaRecord> = {
            let registry = self.registry.read().await;
            registry.records().cloned().collect()
        };
        let mut engine = self.engine.write().await;
        for rec in &records {
            engine.init_strategy(&rec.key, rec.kind, rec.replicated, &rec.params);
        }
        if !records.is_empty() {
            tracing::info!("restored policy state for {} key(s)", records.len());
        }
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// Create a key this DC has never seen. The local DC becomes the first
    /// replica; `min_dcs_number - 1` additional replicas are pushed to
    /// peers. Partial fan-out failure is logged, not propagated.
    pub async fn create(
        &self,
        key: &str,
        value: Vec<u8>,
        kind: StrategyKind,
        params: Option<StrategyParams>,
    ) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;
        let params = params.unwrap_or_else(|| self.default_params.clone());

        if self.registry.read().await.read(key).is_some() {
            return Err(ReplError::AlreadyExists);
        }

        self.engine
            .write()
            .await
            .init_strategy(key, kind, true, &params);

        let record = ReplicaRecord::created_here(
            key.to_string(),
            self.local.id.clone(),
            kind,
            params.clone(),
            self.clock.stamp(),
        );
        self.registry.write().await.create(record)?;
        self.values
            .write()
            .await
            .put(key, value.clone())
            .map_err(backend)?;
        tide_metrics::metrics().replicas_held.inc();

        // Peers learn the location first; seed replicas follow.
        self.idm.gossip_replica_location(key).await;

        if params.min_dcs_number > 1 {
            let targets = self.idm.initial_targets(params.min_dcs_number);
            if targets.len() + 1 < params.min_dcs_number {
                tracing::warn!(
                    "create '{}' wants {} replica DC(s) but only {} available",
                    key,
                    params.min_dcs_number,
                    targets.len() + 1
                );
            }

            let mut all_dcs: BTreeSet<DcId> = targets.iter().map(|t| t.id.clone()).collect();
            all_dcs.insert(self.local.id.clone());

            let report = self
                .idm
                .push_new_replica(key, &value, kind, &params, targets, &all_dcs)
                .await;

            if !report.acked.is_empty() {
                let mut registry = self.registry.write().await;
                if let Some(mut rec) = registry.read_cloned(key) {
                    rec.dcs.extend(report.acked.iter().cloned());
                    registry.update(rec)?;
                }
            }
        }

        Ok(())
    }

    /// Read a key. Served locally when replicated; otherwise fetched from
    /// a peer listed in the registry, acquiring a local replica when read
    /// pressure has crossed the admission threshold.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>, ReplError> {
        let _guard = self.locks.acquire(key).await;

        let record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return Err(ReplError::NotFound),
        };

        let decision = {
            let mut engine = self.engine.write().await;
            engine.init_strategy(key, record.kind, record.replicated, &record.params);
            engine.local_read(key)
        };

        if let Some(value) = self.values.read().await.get(key).map(<[u8]>::to_vec) {
            return Ok(value);
        }

        let mut candidates = record.dcs.clone();
        candidates.remove(&self.local.id);
        if candidates.is_empty() {
            return Err(ReplError::NotFound);
        }

        let value = self.idm.read_from_any(key, &candidates).await?;

        if decision == Decision::ShouldReplicate {
            self.admit(key, &record, value.clone()).await?;
        }

        Ok(value)
    }

    /// Update a key's value. Applies locally iff replicated here, then
    /// fans the stamped update out to every DC listed as holding a copy.
    /// Returns `ok` once the local apply and fan-out initiation complete.
    pub async fn update(&self, key: &str, value: Vec<u8>) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;
        let stamp = self.clock.stamp();

        let mut record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return Err(ReplError::NotFound),
        };

        {
            let mut engine = self.engine.write().await;
            engine.init_strategy(key, record.kind, record.replicated, &record.params);
            // Write pressure accrues strength; admission only happens on read.
            engine.local_write(key);
        }

        if record.replicated {
            self.values
                .write()
                .await
                .put(key, value.clone())
                .map_err(backend)?;
            record.last_update = stamp.clone();
            self.registry.write().await.update(record.clone())?;
        }

        self.idm
            .fan_out_update(&record.dcs, key, &value, &record.params, &stamp)
            .await;

        Ok(())
    }

    /// Drop the local replica. The key keeps existing globally; this DC
    /// keeps tracking the remaining holders. Removing an unknown key is ok.
    pub async fn remove_replica(&self, key: &str) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;
        let record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return Ok(()),
        };
        self.drop_local_replica(key, record).await
    }

    /// Conditional variant of [`remove_replica`]: drops the local replica
    /// only if the current value equals `expected`.
    ///
    /// [`remove_replica`]: Self::remove_replica
    pub async fn remove_replica_verified(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;
        let record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return Err(ReplError::NotFound),
        };

        match self.values.read().await.get(key) {
            Some(current) if current == expected => {}
            Some(_) => {
                return Err(ReplError::FailedVerification(format!(
                    "current value of '{key}' does not match expected"
                )))
            }
            None => return Err(ReplError::NoReplica),
        }

        self.drop_local_replica(key, record).await
    }

    /// Shared removal path. Caller holds the key lock and has resolved the
    /// record.
    async fn drop_local_replica(
        &self,
        key: &str,
        mut record: ReplicaRecord,
    ) -> Result<(), ReplError> {
        let was_replicated = record.replicated;

        self.values.write().await.remove(key).map_err(backend)?;
        record.replicated = false;
        record.strength = 0.0;
        record.dcs.remove(&self.local.id);
        self.registry.write().await.update(record.clone())?;
        self.engine.write().await.on_evicted(key);

        if was_replicated {
            let m = tide_metrics::metrics();
            m.replicas_evicted.inc();
            m.replicas_held.dec();
        }

        self.idm.broadcast_evict(&record.dcs, key).await;
        Ok(())
    }

    /// Install a local replica after read pressure crossed the admission
    /// threshold. Caller holds the key lock.
    async fn admit(&self, key: &str, record: &ReplicaRecord, value: Vec<u8>) -> Result<(), ReplError> {
        self.values.write().await.put(key, value).map_err(backend)?;
        self.engine.write().await.on_acquired(key);

        let mut rec = record.clone();
        rec.replicated = true;
        rec.strength = rec.params.repl_threshold;
        rec.dcs.insert(self.local.id.clone());
        self.registry.write().await.update(rec)?;

        let m = tide_metrics::metrics();
        m.replicas_acquired.inc();
        m.replicas_held.inc();
        tracing::info!("acquired replica of '{}' under read pressure", key);

        self.idm.gossip_replica_location(key).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Decay-driven eviction
    // -----------------------------------------------------------------------

    /// One decay cycle: tick every key's policy and act on the decisions.
    /// Returns the number of replicas dropped.
    pub async fn run_decay_cycle(&self) -> usize {
        let decisions = self.engine.write().await.tick_all();
        let mut evicted = 0usize;
        for (key, decision) in decisions {
            if decision == Decision::ShouldEvict && self.evict_by_decay(&key).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!("decay cycle dropped {} replica(s)", evicted);
        }
        evicted
    }

    async fn evict_by_decay(&self, key: &str) -> bool {
        let _guard = self.locks.acquire(key).await;

        let record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return false,
        };
        if !record.replicated {
            return false;
        }

        // The decision may be stale: an access between the tick and this
        // lock acquisition can push strength back above the threshold.
        let strength = self.engine.read().await.strength(key).unwrap_or(0.0);
        if strength > record.params.rmv_threshold {
            return false;
        }

        if record.dcs.len() <= 1 {
            tide_metrics::metrics().last_replica_retained.inc();
            tracing::debug!("'{}' decayed below threshold but is the last replica", key);
            return false;
        }

        tracing::info!("evicting replica of '{}' (strength {} decayed)", key, strength);
        if let Err(e) = self.drop_local_replica(key, record).await {
            tracing::warn!("decay eviction of '{}' failed: {}", key, e);
            return false;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Inbound handlers (invoked by peer DCs via tide-net)
    // -----------------------------------------------------------------------

    /// A peer announced it now holds a replica of `key`.
    pub async fn handle_replica_location(&self, key: &str, from: DcId) -> Result<(), ReplError> {
        self.add_dc_to_replica(key, from).await
    }

    /// A peer pushed a full replica at us. Returns whether it was
    /// installed (false: we already replicate the key).
    pub async fn handle_new_replica(
        &self,
        key: &str,
        value: Vec<u8>,
        kind: StrategyKind,
        params: StrategyParams,
        all_dcs: BTreeSet<DcId>,
    ) -> Result<bool, ReplError> {
        let _guard = self.locks.acquire(key).await;

        if matches!(self.registry.read().await.read(key), Some(r) if r.replicated) {
            return Ok(false);
        }

        self.values.write().await.put(key, value).map_err(backend)?;

        let mut dcs = all_dcs;
        dcs.insert(self.local.id.clone());
        let record = ReplicaRecord {
            key: key.to_string(),
            replicated: true,
            strength: params.repl_threshold,
            kind,
            params: params.clone(),
            dcs,
            last_update: self.clock.stamp(),
        };
        self.registry.write().await.upsert(record)?;

        {
            let mut engine = self.engine.write().await;
            engine.init_strategy(key, kind, true, &params);
            engine.on_acquired(key);
        }

        let m = tide_metrics::metrics();
        m.replicas_acquired.inc();
        m.replicas_held.inc();

        // Announce our own location so DCs outside the seed set converge
        // on the membership too.
        let idm = self.idm.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            idm.gossip_replica_location(&key).await;
        });

        Ok(true)
    }

    /// A peer fanned an update at us. Last-writer-wins by stamp: returns
    /// whether the update was applied (false: dropped as stale).
    pub async fn handle_update(
        &self,
        key: &str,
        value: Vec<u8>,
        stamp: UpdateStamp,
    ) -> Result<bool, ReplError> {
        let _guard = self.locks.acquire(key).await;

        let mut record = match self.registry.read().await.read_cloned(key) {
            Some(r) => r,
            None => return Err(ReplError::NoReplica),
        };
        if !record.replicated {
            return Err(ReplError::NoReplica);
        }

        if stamp <= record.last_update {
            tide_metrics::metrics().stale_updates_dropped.inc();
            tracing::debug!(
                "dropping stale update for '{}' ({} <= {})",
                key,
                stamp,
                record.last_update
            );
            return Ok(false);
        }

        self.values.write().await.put(key, value).map_err(backend)?;
        record.last_update = stamp;
        self.registry.write().await.update(record)?;
        Ok(true)
    }

    /// A peer wants to read `key` from us. Served straight from the value
    /// store; remote reads do not count as local access pressure.
    pub async fn handle_remote_read(&self, key: &str) -> Result<Vec<u8>, ReplError> {
        match self.values.read().await.get(key).map(<[u8]>::to_vec) {
            Some(v) => Ok(v),
            None => Err(ReplError::NoReplica),
        }
    }

    /// A peer dropped its replica of `key`.
    pub async fn handle_evict_signal(&self, key: &str, from: DcId) -> Result<(), ReplError> {
        self.remove_dc_from_replica(key, &from).await
    }

    /// Idempotently record that `dc` holds a replica of `key`. Unknown
    /// keys get a non-replicated stub so later read pressure can acquire.
    pub async fn add_dc_to_replica(&self, key: &str, dc: DcId) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;

        match self.registry.read().await.read_cloned(key) {
            Some(mut record) => {
                if record.dcs.insert(dc) {
                    self.registry.write().await.update(record)?;
                }
                Ok(())
            }
            None => {
                let record = ReplicaRecord::remote_stub(
                    key.to_string(),
                    dc,
                    StrategyKind::default(),
                    self.default_params.clone(),
                );
                self.engine
                    .write()
                    .await
                    .init_strategy(key, record.kind, false, &record.params);
                self.registry.write().await.create(record)?;
                Ok(())
            }
        }
    }

    /// Idempotently record that `dc` no longer holds a replica of `key`.
    pub async fn remove_dc_from_replica(&self, key: &str, dc: &DcId) -> Result<(), ReplError> {
        let _guard = self.locks.acquire(key).await;

        if let Some(mut record) = self.registry.read().await.read_cloned(key) {
            if record.dcs.remove(dc) {
                self.registry.write().await.update(record)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin surface
    // -----------------------------------------------------------------------

    /// Replication state of one key, if known here.
    pub async fn key_status(&self, key: &str) -> Option<KeyStatus> {
        let record = self.registry.read().await.read_cloned(key)?;
        let strength = self
            .engine
            .read()
            .await
            .strength(key)
            .unwrap_or(record.strength);
        Some(KeyStatus {
            replicated: record.replicated,
            strength,
            dcs: record.dcs.iter().cloned().collect(),
        })
    }

    /// `(keys_tracked, replicas_held)`.
    pub async fn stats(&self) -> (usize, usize) {
        let registry = self.registry.read().await;
        (registry.len(), registry.replicated_count())
    }
}

fn backend(e: StorageError) -> ReplError {
    ReplError::Backend(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
