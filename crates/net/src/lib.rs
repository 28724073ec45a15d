//! gRPC networking layer for tidekv.
//!
//! Provides:
//! - `GrpcPeerClient`: implements `PeerClient` over tonic for real network I/O
//! - `SyncService`: bridges the ReplicaSync proto to the manager's inbound handlers
//! - `ClientService`: bridges the ClientApi proto to the manager's client operations
//! - `AdminService`: health checks, stats, per-key status
//! - `build_server`: assembles all services into a tonic `Router`

pub mod client;
pub mod convert;
pub mod server;

pub use client::{GrpcPeerClient, PeerTimeouts};
pub use server::{AdminService, ClientService, SyncService};

use std::sync::Arc;
use std::time::Instant;
use tide_repl::peer_client::PeerClient;
use tide_repl::ReplicaManager;

/// Build a tonic `Router` with all gRPC services.
pub fn build_server<C: PeerClient>(
    manager: Arc<ReplicaManager<C>>,
) -> tonic::transport::server::Router {
    let sync_svc = SyncService {
        manager: manager.clone(),
    };
    let client_svc = ClientService {
        manager: manager.clone(),
    };
    let admin_svc = AdminService {
        manager,
        start_time: Instant::now(),
    };

    tonic::transport::Server::builder()
        .add_service(tide_proto::sync::replica_sync_server::ReplicaSyncServer::new(sync_svc))
        .add_service(tide_proto::client::client_api_server::ClientApiServer::new(client_svc))
        .add_service(tide_proto::admin::admin_server::AdminServer::new(admin_svc))
}
