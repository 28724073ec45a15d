//! Inter-DC manager: outbound fan-out primitives.
//!
//! Fans requests out to peer DCs over a [`PeerClient`], aggregating
//! per-target outcomes. Partial failure is reported, never retried here;
//! retries are the caller's choice, and gossip-style calls simply log.

use crate::params::{StrategyKind, StrategyParams};
use crate::peer_client::{PeerClient, PeerError};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tide_common::{DcId, DcInfo, ReplError, UpdateStamp};

/// Aggregate outcome of one fan-out call.
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Targets that acknowledged.
    pub acked: Vec<DcId>,
    /// Targets that failed, with the per-target error.
    pub failures: Vec<(DcId, PeerError)>,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.acked.len() + self.failures.len()
    }

    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outbound coordination with peer DCs.
///
/// Holds the fixed peer set (config order) and the transport. Generic over
/// `C: PeerClient` for testability: real deployment uses the gRPC client
/// from `tide-net`; unit tests use mocks.
#[derive(Debug)]
pub struct InterDcManager<C: PeerClient> {
    local: DcId,
    peers: Vec<DcInfo>,
    client: Arc<C>,
}

impl<C: PeerClient> InterDcManager<C> {
    pub fn new(local: DcId, peers: Vec<DcInfo>, client: Arc<C>) -> Self {
        Self {
            local,
            peers,
            client,
        }
    }

    pub fn local(&self) -> &DcId {
        &self.local
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn peers(&self) -> &[DcInfo] {
        &self.peers
    }

    pub fn peer_info(&self, id: &DcId) -> Option<&DcInfo> {
        self.peers.iter().find(|p| &p.id == id)
    }

    /// The peers that receive the initial replicas of a new key: the first
    /// `min_dcs_number - 1` in config order.
    pub fn initial_targets(&self, min_dcs_number: usize) -> &[DcInfo] {
        let wanted = min_dcs_number.saturating_sub(1).min(self.peers.len());
        &self.peers[..wanted]
    }

    // -----------------------------------------------------------------------
    // Fan-out primitives
    // -----------------------------------------------------------------------

    /// Tell every peer this DC now holds a replica of `key`. Fire-and-forget:
    /// failures are logged and reported, never surfaced to the client.
    pub async fn gossip_replica_location(&self, key: &str) -> FanoutReport {
        let key = key.to_string();
        let from = self.local.clone();
        let report = self
            .fan_out(self.peers.clone(), move |client, target| {
                let key = key.clone();
                let from = from.clone();
                async move { client.announce_location(&target, &key, &from).await }
            })
            .await;
        self.log_partial("announce_location", &report);
        report
    }

    /// Instantiate replicas of a new key on `targets`.
    pub async fn push_new_replica(
        &self,
        key: &str,
        value: &[u8],
        kind: StrategyKind,
        params: &StrategyParams,
        targets: &[DcInfo],
        all_dcs: &BTreeSet<DcId>,
    ) -> FanoutReport {
        let key = key.to_string();
        let value = value.to_vec();
        let params = params.clone();
        let all_dcs = all_dcs.clone();
        let report = self
            .fan_out(targets.to_vec(), move |client, target| {
                let key = key.clone();
                let value = value.clone();
                let params = params.clone();
                let all_dcs = all_dcs.clone();
                async move {
                    client
                        .push_replica(&target, &key, &value, kind, &params, &all_dcs)
                        .await
                }
            })
            .await;
        self.log_partial("push_replica", &report);
        report
    }

    /// Propagate a stamped update to the DCs in `dcs`, excluding self.
    pub async fn fan_out_update(
        &self,
        dcs: &BTreeSet<DcId>,
        key: &str,
        value: &[u8],
        params: &StrategyParams,
        stamp: &UpdateStamp,
    ) -> FanoutReport {
        let key = key.to_string();
        let value = value.to_vec();
        let params = params.clone();
        let stamp = stamp.clone();
        let targets = self.resolve(dcs);
        let report = self
            .fan_out(targets, move |client, target| {
                let key = key.clone();
                let value = value.clone();
                let params = params.clone();
                let stamp = stamp.clone();
                async move {
                    client
                        .push_update(&target, &key, &value, &params, &stamp)
                        .await
                        .map(|_applied| ())
                }
            })
            .await;
        self.log_partial("push_update", &report);
        report
    }

    /// Try each DC in `dcs` (excluding self) in order; return the first
    /// successful read. An empty candidate list is `NoDcs`; if every
    /// attempt fails, the last error decides between `Timeout` and `NoDcs`.
    pub async fn read_from_any(
        &self,
        key: &str,
        dcs: &BTreeSet<DcId>,
    ) -> Result<Vec<u8>, ReplError> {
        let targets = self.resolve(dcs);
        if targets.is_empty() {
            return Err(ReplError::NoDcs);
        }

        let mut last_err = ReplError::NoDcs;
        for target in targets {
            match self.client.remote_read(&target, key).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!("remote read of '{}' from {} failed: {}", key, target.id, e);
                    last_err = match e {
                        PeerError::Timeout => ReplError::Timeout(target.id.clone()),
                        PeerError::NoReplica => ReplError::NoReplica,
                        _ => ReplError::NoDcs,
                    };
                }
            }
        }
        Err(last_err)
    }

    /// Tell the DCs in `dcs` (excluding self) that this DC dropped its
    /// replica. Fire-and-forget.
    pub async fn broadcast_evict(&self, dcs: &BTreeSet<DcId>, key: &str) -> FanoutReport {
        let key = key.to_string();
        let from = self.local.clone();
        let targets = self.resolve(dcs);
        let report = self
            .fan_out(targets, move |client, target| {
                let key = key.clone();
                let from = from.clone();
                async move { client.evict_signal(&target, &key, &from).await }
            })
            .await;
        self.log_partial("evict_signal", &report);
        report
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Map DC ids to peer descriptors, dropping self and logging ids the
    /// config does not know (membership is fixed at startup).
    fn resolve(&self, dcs: &BTreeSet<DcId>) -> Vec<DcInfo> {
        let mut targets = Vec::new();
        for id in dcs {
            if *id == self.local {
                continue;
            }
            match self.peer_info(id) {
                Some(info) => targets.push(info.clone()),
                None => tracing::warn!("DC '{}' not in configured peer set, skipping", id),
            }
        }
        targets
    }

    /// Run one RPC per target concurrently and gather the outcomes.
    async fn fan_out<F, Fut>(&self, targets: Vec<DcInfo>, call: F) -> FanoutReport
    where
        F: Fn(Arc<C>, DcInfo) -> Fut,
        Fut: std::future::Future<Output = Result<(), PeerError>> + Send + 'static,
    {
        let mut futs = FuturesUnordered::new();
        for target in targets {
            let id = target.id.clone();
            let fut = call(self.client.clone(), target);
            futs.push(tokio::spawn(async move { (id, fut.await) }));
        }

        let mut report = FanoutReport::default();
        while let Some(joined) = futs.next().await {
            match joined {
                Ok((id, Ok(()))) => report.acked.push(id),
                Ok((id, Err(e))) => report.failures.push((id, e)),
                Err(e) => tracing::warn!("fan-out task panicked: {}", e),
            }
        }
        report
    }

    fn log_partial(&self, rpc: &str, report: &FanoutReport) {
        if !report.failures.is_empty() {
            tide_metrics::metrics()
                .fanout_failures
                .inc_by(report.failures.len() as u64);
            for (id, e) in &report.failures {
                tracing::warn!("{} to {} failed: {}", rpc, id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Mock transport that records calls and fails configured targets.
    #[derive(Default)]
    struct MockClient {
        fail: HashSet<DcId>,
        time_out: HashSet<DcId>,
        values: std::collections::HashMap<DcId, Vec<u8>>,
        calls: Mutex<Vec<(String, DcId)>>,
    }

    impl MockClient {
        fn log(&self, rpc: &str, target: &DcInfo) {
            self.calls
                .lock()
                .unwrap()
                .push((rpc.to_string(), target.id.clone()));
        }

        fn outcome(&self, target: &DcInfo) -> Result<(), PeerError> {
            if self.time_out.contains(&target.id) {
                Err(PeerError::Timeout)
            } else if self.fail.contains(&target.id) {
                Err(PeerError::RpcFailed("simulated failure".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl PeerClient for MockClient {
        async fn announce_location(
            &self,
            target: &DcInfo,
            _key: &str,
            _from: &DcId,
        ) -> Result<(), PeerError> {
            self.log("announce", target);
            self.outcome(target)
        }

        async fn push_replica(
            &self,
            target: &DcInfo,
            _key: &str,
            _value: &[u8],
            _kind: StrategyKind,
            _params: &StrategyParams,
            _all_dcs: &BTreeSet<DcId>,
        ) -> Result<(), PeerError> {
            self.log("push_replica", target);
            self.outcome(target)
        }

        async fn push_update(
            &self,
            target: &DcInfo,
            _key: &str,
            _value: &[u8],
            _params: &StrategyParams,
            _stamp: &UpdateStamp,
        ) -> Result<bool, PeerError> {
            self.log("push_update", target);
            self.outcome(target).map(|_| true)
        }

        async fn remote_read(&self, target: &DcInfo, _key: &str) -> Result<Vec<u8>, PeerError> {
            self.log("remote_read", target);
            self.outcome(target)?;
            self.values
                .get(&target.id)
                .cloned()
                .ok_or(PeerError::NoReplica)
        }

        async fn evict_signal(
            &self,
            target: &DcInfo,
            _key: &str,
            _from: &DcId,
        ) -> Result<(), PeerError> {
            self.log("evict", target);
            self.outcome(target)
        }
    }

    fn peers(ids: &[&str]) -> Vec<DcInfo> {
        ids.iter().map(|id| DcInfo::with_dummy_addr(*id)).collect()
    }

    fn dcs(ids: &[&str]) -> BTreeSet<DcId> {
        ids.iter().map(|id| DcId::new(*id)).collect()
    }

    fn idm(client: MockClient, peer_ids: &[&str]) -> InterDcManager<MockClient> {
        InterDcManager::new(DcId::new("dc-a"), peers(peer_ids), Arc::new(client))
    }

    #[tokio::test]
    async fn test_gossip_targets_all_peers() {
        let m = idm(MockClient::default(), &["dc-b", "dc-c", "dc-d"]);
        let report = m.gossip_replica_location("k").await;
        assert_eq!(report.attempted(), 3);
        assert!(report.all_ok());
    }

    #[tokio::test]
    async fn test_gossip_reports_partial_failure() {
        let mut client = MockClient::default();
        client.fail.insert(DcId::new("dc-c"));
        let m = idm(client, &["dc-b", "dc-c"]);

        let report = m.gossip_replica_location("k").await;
        assert_eq!(report.acked, vec![DcId::new("dc-b")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, DcId::new("dc-c"));
    }

    #[tokio::test]
    async fn test_initial_targets_are_first_peers_in_config_order() {
        let m = idm(MockClient::default(), &["dc-b", "dc-c", "dc-d"]);
        let targets = m.initial_targets(3);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, DcId::new("dc-b"));
        assert_eq!(targets[1].id, DcId::new("dc-c"));

        assert!(m.initial_targets(1).is_empty());
        // Clamped when there are fewer peers than requested.
        assert_eq!(m.initial_targets(10).len(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_update_excludes_self_and_unknown() {
        let m = idm(MockClient::default(), &["dc-b"]);
        let report = m
            .fan_out_update(
                &dcs(&["dc-a", "dc-b", "dc-z"]),
                "k",
                b"v",
                &StrategyParams::default(),
                &UpdateStamp::zero(DcId::new("dc-a")),
            )
            .await;
        assert_eq!(report.attempted(), 1, "self and unknown DCs are skipped");
        assert_eq!(report.acked, vec![DcId::new("dc-b")]);
    }

    #[tokio::test]
    async fn test_read_from_any_first_success_wins() {
        let mut client = MockClient::default();
        client.fail.insert(DcId::new("dc-b"));
        client.values.insert(DcId::new("dc-c"), b"v".to_vec());
        let m = idm(client, &["dc-b", "dc-c"]);

        let value = m.read_from_any("k", &dcs(&["dc-b", "dc-c"])).await.unwrap();
        assert_eq!(value, b"v");
    }

    #[tokio::test]
    async fn test_read_from_any_is_sequential_and_stops_early() {
        let mut client = MockClient::default();
        client.values.insert(DcId::new("dc-b"), b"v".to_vec());
        let m = idm(client, &["dc-b", "dc-c"]);

        m.read_from_any("k", &dcs(&["dc-b", "dc-c"])).await.unwrap();
        let calls = m.client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "first hit stops the scan");
        assert_eq!(calls[0].1, DcId::new("dc-b"));
    }

    #[tokio::test]
    async fn test_read_from_any_empty_is_no_dcs() {
        let m = idm(MockClient::default(), &["dc-b"]);
        let err = m.read_from_any("k", &dcs(&["dc-a"])).await.unwrap_err();
        assert!(matches!(err, ReplError::NoDcs));
    }

    #[tokio::test]
    async fn test_read_from_any_timeout_is_reported() {
        let mut client = MockClient::default();
        client.time_out.insert(DcId::new("dc-b"));
        let m = idm(client, &["dc-b"]);

        let err = m.read_from_any("k", &dcs(&["dc-b"])).await.unwrap_err();
        assert!(matches!(err, ReplError::Timeout(id) if id == DcId::new("dc-b")));
    }

    #[tokio::test]
    async fn test_broadcast_evict_excludes_self() {
        let m = idm(MockClient::default(), &["dc-b", "dc-c"]);
        let report = m.broadcast_evict(&dcs(&["dc-a", "dc-b", "dc-c"]), "k").await;
        assert_eq!(report.attempted(), 2);
    }
}
