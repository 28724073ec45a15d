//! gRPC client implementing `PeerClient`.
//!
//! `GrpcPeerClient` connects to peer DCs via tonic and translates between
//! proto types and the domain types. Maintains a pool of channels, creating
//! connections on demand. Every RPC runs under a bounded deadline: queries
//! get the short timeout, state-changing calls the long one. A timed-out
//! call is reported, never retried here.

use crate::convert;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tide_common::{DcId, DcInfo, UpdateStamp};
use tide_proto::sync::replica_sync_client::ReplicaSyncClient;
use tide_repl::params::{StrategyKind, StrategyParams};
use tide_repl::peer_client::{PeerClient, PeerError};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tonic::transport::Channel;

/// Per-call deadlines for outbound RPCs.
#[derive(Debug, Clone, Copy)]
pub struct PeerTimeouts {
    /// Queries (remote reads).
    pub query: Duration,
    /// State-changing calls (announce, push, update, evict).
    pub mutate: Duration,
}

impl Default for PeerTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_millis(1000),
            mutate: Duration::from_millis(5000),
        }
    }
}

/// A gRPC-based peer transport.
#[derive(Debug)]
pub struct GrpcPeerClient {
    timeouts: PeerTimeouts,
    channels: Arc<RwLock<HashMap<DcId, Channel>>>,
}

impl GrpcPeerClient {
    pub fn new(timeouts: PeerTimeouts) -> Self {
        Self {
            timeouts,
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_channel(&self, target: &DcInfo) -> Result<Channel, PeerError> {
        // Check cache first
        {
            let cache = self.channels.read().await;
            if let Some(channel) = cache.get(&target.id) {
                return Ok(channel.clone());
            }
        }

        // Create new connection
        let endpoint = format!("http://{}", target.addr);
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| PeerError::RpcFailed(format!("invalid endpoint: {e}")))?
            .connect()
            .await
            .map_err(|e| PeerError::RpcFailed(format!("connect failed: {e}")))?;

        // Cache it
        {
            let mut cache = self.channels.write().await;
            cache.insert(target.id.clone(), channel.clone());
        }

        Ok(channel)
    }

    /// Remove a cached channel (e.g., on connection failure).
    pub async fn invalidate(&self, dc: &DcId) {
        let mut cache = self.channels.write().await;
        cache.remove(dc);
    }

    /// Run one outbound RPC under its deadline, with metrics.
    async fn call<T, F>(&self, rpc_type: &str, deadline: Duration, fut: F) -> Result<T, PeerError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        let m = tide_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&[rpc_type]).inc();
        let _timer = tide_metrics::start_rpc_timer(rpc_type, "outbound");

        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout),
        }
    }
}

#[async_trait::async_trait]
impl PeerClient for GrpcPeerClient {
    async fn announce_location(
        &self,
        target: &DcInfo,
        key: &str,
        from: &DcId,
    ) -> Result<(), PeerError> {
        self.call("announce_location", self.timeouts.mutate, async {
            let channel = self.get_channel(target).await?;
            let mut client = ReplicaSyncClient::new(channel);
            client
                .announce_location(tide_proto::sync::AnnounceLocationRequest {
                    key: key.to_string(),
                    from_dc: from.to_string(),
                })
                .await
                .map_err(|e| PeerError::RpcFailed(format!("announce_location RPC failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn push_replica(
        &self,
        target: &DcInfo,
        key: &str,
        value: &[u8],
        kind: StrategyKind,
        params: &StrategyParams,
        all_dcs: &BTreeSet<DcId>,
    ) -> Result<(), PeerError> {
        self.call("push_replica", self.timeouts.mutate, async {
            let channel = self.get_channel(target).await?;
            let mut client = ReplicaSyncClient::new(channel);
            let resp = client
                .new_replica(tide_proto::sync::NewReplicaRequest {
                    key: key.to_string(),
                    value: value.to_vec(),
                    strategy: kind.as_str().to_string(),
                    params: Some(convert::params_to_proto(params)),
                    all_dcs: convert::dcs_to_proto(all_dcs),
                })
                .await
                .map_err(|e| PeerError::RpcFailed(format!("new_replica RPC failed: {e}")))?;

            if resp.into_inner().created {
                Ok(())
            } else {
                Err(PeerError::AlreadyExists)
            }
        })
        .await
    }

    async fn push_update(
        &self,
        target: &DcInfo,
        key: &str,
        value: &[u8],
        params: &StrategyParams,
        stamp: &UpdateStamp,
    ) -> Result<bool, PeerError> {
        self.call("push_update", self.timeouts.mutate, async {
            let channel = self.get_channel(target).await?;
            let mut client = ReplicaSyncClient::new(channel);
            let resp = client
                .push_update(tide_proto::sync::PushUpdateRequest {
                    key: key.to_string(),
                    value: value.to_vec(),
                    params: Some(convert::params_to_proto(params)),
                    stamp: Some(convert::stamp_to_proto(stamp)),
                })
                .await
                .map_err(|e| PeerError::RpcFailed(format!("push_update RPC failed: {e}")))?;

            let inner = resp.into_inner();
            if inner.has_replica {
                Ok(inner.applied)
            } else {
                Err(PeerError::NoReplica)
            }
        })
        .await
    }

    async fn remote_read(&self, target: &DcInfo, key: &str) -> Result<Vec<u8>, PeerError> {
        self.call("remote_read", self.timeouts.query, async {
            let channel = self.get_channel(target).await?;
            let mut client = ReplicaSyncClient::new(channel);
            let resp = client
                .remote_read(tide_proto::sync::RemoteReadRequest {
                    key: key.to_string(),
                })
                .await
                .map_err(|e| PeerError::RpcFailed(format!("remote_read RPC failed: {e}")))?;

            let inner = resp.into_inner();
            if inner.found {
                Ok(inner.value)
            } else {
                Err(PeerError::NoReplica)
            }
        })
        .await
    }

    async fn evict_signal(
        &self,
        target: &DcInfo,
        key: &str,
        from: &DcId,
    ) -> Result<(), PeerError> {
        self.call("evict_signal", self.timeouts.mutate, async {
            let channel = self.get_channel(target).await?;
            let mut client = ReplicaSyncClient::new(channel);
            client
                .evict_signal(tide_proto::sync::EvictSignalRequest {
                    key: key.to_string(),
                    from_dc: from.to_string(),
                })
                .await
                .map_err(|e| PeerError::RpcFailed(format!("evict_signal RPC failed: {e}")))?;
            Ok(())
        })
        .await
    }
}
