//! gRPC service implementations.
//!
//! Bridges tonic-generated service traits to the replica manager in the
//! `repl` crate.

use crate::convert;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tide_common::{DcId, ReplError};
use tide_repl::peer_client::PeerClient;
use tide_repl::ReplicaManager;

/// Map a domain error onto the canonical gRPC status code.
fn error_status(e: ReplError) -> tonic::Status {
    match e {
        ReplError::NotFound => tonic::Status::not_found(e.to_string()),
        ReplError::AlreadyExists => tonic::Status::already_exists(e.to_string()),
        ReplError::NoReplica => tonic::Status::failed_precondition(e.to_string()),
        ReplError::Timeout(_) => tonic::Status::deadline_exceeded(e.to_string()),
        ReplError::NoDcs => tonic::Status::unavailable(e.to_string()),
        ReplError::FailedVerification(_) => tonic::Status::failed_precondition(e.to_string()),
        ReplError::Backend(_) => tonic::Status::internal(e.to_string()),
    }
}

fn count_inbound(rpc_type: &str) {
    let m = tide_metrics::metrics();
    m.rpcs_received.inc();
    m.rpcs_received_by_type.with_label_values(&[rpc_type]).inc();
}

// ---------------------------------------------------------------------------
// ReplicaSync gRPC service (DC-to-DC)
// ---------------------------------------------------------------------------

pub struct SyncService<C: PeerClient> {
    pub manager: Arc<ReplicaManager<C>>,
}

impl<C: PeerClient> std::fmt::Debug for SyncService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<C: PeerClient> tide_proto::sync::replica_sync_server::ReplicaSync for SyncService<C> {
    async fn announce_location(
        &self,
        request: tonic::Request<tide_proto::sync::AnnounceLocationRequest>,
    ) -> Result<tonic::Response<tide_proto::sync::AnnounceLocationResponse>, tonic::Status> {
        count_inbound("announce_location");
        let _timer = tide_metrics::start_rpc_timer("announce_location", "inbound");
        let req = request.into_inner();

        self.manager
            .handle_replica_location(&req.key, DcId::new(req.from_dc))
            .await
            .map_err(error_status)?;

        Ok(tonic::Response::new(
            tide_proto::sync::AnnounceLocationResponse {},
        ))
    }

    async fn new_replica(
        &self,
        request: tonic::Request<tide_proto::sync::NewReplicaRequest>,
    ) -> Result<tonic::Response<tide_proto::sync::NewReplicaResponse>, tonic::Status> {
        count_inbound("new_replica");
        let _timer = tide_metrics::start_rpc_timer("new_replica", "inbound");
        let req = request.into_inner();

        let kind = convert::kind_from_tag(&req.strategy)?;
        let params = req
            .params
            .as_ref()
            .map(convert::params_from_proto)
            .ok_or_else(|| tonic::Status::invalid_argument("missing strategy params"))?;

        let created = self
            .manager
            .handle_new_replica(
                &req.key,
                req.value,
                kind,
                params,
                convert::dcs_from_proto(&req.all_dcs),
            )
            .await
            .map_err(error_status)?;

        Ok(tonic::Response::new(tide_proto::sync::NewReplicaResponse {
            created,
        }))
    }

    async fn push_update(
        &self,
        request: tonic::Request<tide_proto::sync::PushUpdateRequest>,
    ) -> Result<tonic::Response<tide_proto::sync::PushUpdateResponse>, tonic::Status> {
        count_inbound("push_update");
        let _timer = tide_metrics::start_rpc_timer("push_update", "inbound");
        let req = request.into_inner();

        let stamp = req
            .stamp
            .as_ref()
            .map(convert::stamp_from_proto)
            .ok_or_else(|| tonic::Status::invalid_argument("missing update stamp"))?;

        match self.manager.handle_update(&req.key, req.value, stamp).await {
            Ok(applied) => Ok(tonic::Response::new(tide_proto::sync::PushUpdateResponse {
                has_replica: true,
                applied,
            })),
            Err(ReplError::NoReplica) => {
                Ok(tonic::Response::new(tide_proto::sync::PushUpdateResponse {
                    has_replica: false,
                    applied: false,
                }))
            }
            Err(e) => Err(error_status(e)),
        }
    }

    async fn remote_read(
        &self,
        request: tonic::Request<tide_proto::sync::RemoteReadRequest>,
    ) -> Result<tonic::Response<tide_proto::sync::RemoteReadResponse>, tonic::Status> {
        count_inbound("remote_read");
        let _timer = tide_metrics::start_rpc_timer("remote_read", "inbound");
        let req = request.into_inner();

        match self.manager.handle_remote_read(&req.key).await {
            Ok(value) => Ok(tonic::Response::new(tide_proto::sync::RemoteReadResponse {
                found: true,
                value,
            })),
            Err(ReplError::NoReplica) => {
                Ok(tonic::Response::new(tide_proto::sync::RemoteReadResponse {
                    found: false,
                    value: Vec::new(),
                }))
            }
            Err(e) => Err(error_status(e)),
        }
    }

    async fn evict_signal(
        &self,
        request: tonic::Request<tide_proto::sync::EvictSignalRequest>,
    ) -> Result<tonic::Response<tide_proto::sync::EvictSignalResponse>, tonic::Status> {
        count_inbound("evict_signal");
        let _timer = tide_metrics::start_rpc_timer("evict_signal", "inbound");
        let req = request.into_inner();

        self.manager
            .handle_evict_signal(&req.key, DcId::new(req.from_dc))
            .await
            .map_err(error_status)?;

        Ok(tonic::Response::new(
            tide_proto::sync::EvictSignalResponse {},
        ))
    }
}

// ---------------------------------------------------------------------------
// Client gRPC service
// ---------------------------------------------------------------------------

pub struct ClientService<C: PeerClient> {
    pub manager: Arc<ReplicaManager<C>>,
}

impl<C: PeerClient> std::fmt::Debug for ClientService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<C: PeerClient> tide_proto::client::client_api_server::ClientApi for ClientService<C> {
    async fn create(
        &self,
        request: tonic::Request<tide_proto::client::CreateRequest>,
    ) -> Result<tonic::Response<tide_proto::client::CreateResponse>, tonic::Status> {
        tide_metrics::metrics().client_ops.with_label_values(&["create"]).inc();
        let _timer = tide_metrics::start_client_timer("create");
        let req = request.into_inner();

        let kind = convert::kind_from_tag(&req.strategy)?;
        let params = req.params.as_ref().map(convert::params_from_proto);

        self.manager
            .create(&req.key, req.value, kind, params)
            .await
            .map_err(error_status)?;

        Ok(tonic::Response::new(tide_proto::client::CreateResponse {}))
    }

    async fn read(
        &self,
        request: tonic::Request<tide_proto::client::ReadRequest>,
    ) -> Result<tonic::Response<tide_proto::client::ReadResponse>, tonic::Status> {
        tide_metrics::metrics().client_ops.with_label_values(&["read"]).inc();
        let _timer = tide_metrics::start_client_timer("read");
        let req = request.into_inner();

        let value = self.manager.read(&req.key).await.map_err(error_status)?;

        Ok(tonic::Response::new(tide_proto::client::ReadResponse {
            value,
        }))
    }

    async fn update(
        &self,
        request: tonic::Request<tide_proto::client::UpdateRequest>,
    ) -> Result<tonic::Response<tide_proto::client::UpdateResponse>, tonic::Status> {
        tide_metrics::metrics().client_ops.with_label_values(&["update"]).inc();
        let _timer = tide_metrics::start_client_timer("update");
        let req = request.into_inner();

        self.manager
            .update(&req.key, req.value)
            .await
            .map_err(error_status)?;

        Ok(tonic::Response::new(tide_proto::client::UpdateResponse {}))
    }

    async fn remove_replica(
        &self,
        request: tonic::Request<tide_proto::client::RemoveReplicaRequest>,
    ) -> Result<tonic::Response<tide_proto::client::RemoveReplicaResponse>, tonic::Status> {
        tide_metrics::metrics().client_ops.with_label_values(&["remove_replica"]).inc();
        let _timer = tide_metrics::start_client_timer("remove_replica");
        let req = request.into_inner();

        if req.verified {
            self.manager
                .remove_replica_verified(&req.key, &req.expected)
                .await
                .map_err(error_status)?;
        } else {
            self.manager
                .remove_replica(&req.key)
                .await
                .map_err(error_status)?;
        }

        Ok(tonic::Response::new(
            tide_proto::client::RemoveReplicaResponse {},
        ))
    }
}

// ---------------------------------------------------------------------------
// Admin gRPC service
// ---------------------------------------------------------------------------

pub struct AdminService<C: PeerClient> {
    pub manager: Arc<ReplicaManager<C>>,
    pub start_time: StdInstant,
}

impl<C: PeerClient> std::fmt::Debug for AdminService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<C: PeerClient> tide_proto::admin::admin_server::Admin for AdminService<C> {
    async fn health(
        &self,
        _request: tonic::Request<tide_proto::admin::HealthRequest>,
    ) -> Result<tonic::Response<tide_proto::admin::HealthResponse>, tonic::Status> {
        Ok(tonic::Response::new(tide_proto::admin::HealthResponse {
            healthy: true,
            dc_id: self.manager.local().id.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }))
    }

    async fn get_stats(
        &self,
        _request: tonic::Request<tide_proto::admin::StatsRequest>,
    ) -> Result<tonic::Response<tide_proto::admin::StatsResponse>, tonic::Status> {
        let (keys_tracked, replicas_held) = self.manager.stats().await;
        let m = tide_metrics::metrics();

        Ok(tonic::Response::new(tide_proto::admin::StatsResponse {
            keys_tracked: keys_tracked as u64,
            replicas_held: replicas_held as u64,
            rpcs_sent: m.rpcs_sent.get(),
            rpcs_received: m.rpcs_received.get(),
        }))
    }

    async fn key_status(
        &self,
        request: tonic::Request<tide_proto::admin::KeyStatusRequest>,
    ) -> Result<tonic::Response<tide_proto::admin::KeyStatusResponse>, tonic::Status> {
        let req = request.into_inner();

        let resp = match self.manager.key_status(&req.key).await {
            Some(status) => tide_proto::admin::KeyStatusResponse {
                known: true,
                replicated: status.replicated,
                strength: status.strength,
                dcs: status.dcs.iter().map(ToString::to_string).collect(),
            },
            None => tide_proto::admin::KeyStatusResponse {
                known: false,
                replicated: false,
                strength: 0.0,
                dcs: vec![],
            },
        };

        Ok(tonic::Response::new(resp))
    }
}
