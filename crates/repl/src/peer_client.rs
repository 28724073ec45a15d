//! Abstraction over DC-to-DC RPCs.
//!
//! A trait in the domain crate with a gRPC implementation in `tide-net`;
//! unit tests use mocks. Timeouts are the transport's responsibility:
//! every call either completes or fails within its configured deadline.

use crate::params::{StrategyKind, StrategyParams};
use std::collections::BTreeSet;
use tide_common::{DcId, DcInfo, UpdateStamp};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("RPC failed: {0}")]
    RpcFailed(String),
    #[error("timeout")]
    Timeout,
    #[error("target holds no replica")]
    NoReplica,
    #[error("target already holds a replica")]
    AlreadyExists,
}

/// Transport for inter-DC coordination RPCs.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// Tell `target` that `from` now holds a replica of `key`.
    async fn announce_location(
        &self,
        target: &DcInfo,
        key: &str,
        from: &DcId,
    ) -> Result<(), PeerError>;

    /// Instantiate a replica of `key` on `target`, seeding its DC set
    /// with `all_dcs`.
    async fn push_replica(
        &self,
        target: &DcInfo,
        key: &str,
        value: &[u8],
        kind: StrategyKind,
        params: &StrategyParams,
        all_dcs: &BTreeSet<DcId>,
    ) -> Result<(), PeerError>;

    /// Propagate a stamped update to `target`. Returns whether the target
    /// applied it (false means it was dropped as stale).
    async fn push_update(
        &self,
        target: &DcInfo,
        key: &str,
        value: &[u8],
        params: &StrategyParams,
        stamp: &UpdateStamp,
    ) -> Result<bool, PeerError>;

    /// Read `key` from `target` if it holds a replica.
    async fn remote_read(&self, target: &DcInfo, key: &str) -> Result<Vec<u8>, PeerError>;

    /// Tell `target` that `from` dropped its replica of `key`.
    async fn evict_signal(&self, target: &DcInfo, key: &str, from: &DcId)
        -> Result<(), PeerError>;
}
