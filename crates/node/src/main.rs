//! tide-node: entry point for one tidekv data center.
//!
//! Loads config, opens the durable value store and replica registry,
//! wires the strategy engine and inter-DC manager into the replica
//! manager, then serves all gRPC services on the configured listen
//! address with the decay task ticking in the background.

use std::sync::Arc;
use tide_common::{DcId, DcInfo};
use tide_net::{build_server, GrpcPeerClient, PeerTimeouts};
use tide_repl::decay::{spawn_decay_task, DecayTaskConfig};
use tide_repl::params::StrategyParams;
use tide_repl::{InterDcManager, ReplicaManager, ReplicaRegistry, StrategyEngine, ValueStore};
use tide_storage::FsyncPolicy;
use tokio::sync::RwLock;
use tokio::time::Duration;

fn params_from_config(p: &tide_config::ParamsConfig) -> StrategyParams {
    StrategyParams {
        decay_time: p.decay_time,
        decay_factor: p.decay_factor,
        repl_threshold: p.repl_threshold,
        rmv_threshold: p.rmv_threshold,
        max_strength: p.max_strength,
        rstrength: p.rstrength,
        wstrength: p.wstrength,
        min_dcs_number: p.min_dcs_number,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tide_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config =
        tide_config::load_from_file(std::path::Path::new(&config_path)).unwrap_or_else(|e| {
            tracing::warn!(
                "failed to load config from {}: {}, using defaults",
                config_path,
                e
            );
            tide_config::load_from_str("dc_id: \"local\"\nlisten: \"127.0.0.1:7100\"\n")
                .expect("hardcoded default config must parse")
        });

    let local = DcInfo::new(DcId::new(config.dc_id.clone()), config.listen);
    tracing::info!("DC '{}' listening on {}", local.id, config.listen);

    // Resolve the peer set (inline + DC list file)
    let mut peers = Vec::new();
    for entry in config.resolved_peers()? {
        let addr = entry
            .address
            .parse()
            .map_err(|e| format!("peer '{}' has invalid address: {}", entry.id, e))?;
        peers.push(DcInfo::new(DcId::new(entry.id), addr));
    }
    tracing::info!("{} peer DC(s) configured", peers.len());

    // Open the durable tables
    let fsync = FsyncPolicy::from_str_config(&config.storage.fsync);
    let values = Arc::new(RwLock::new(ValueStore::open(
        &config.storage.data_dir,
        fsync,
    )?));
    let registry = Arc::new(RwLock::new(ReplicaRegistry::open(
        &config.storage.data_dir,
        fsync,
    )?));
    let engine = Arc::new(RwLock::new(StrategyEngine::new()));

    // Peer transport with the configured deadlines
    let timeouts = PeerTimeouts {
        query: Duration::from_millis(config.replication.query_timeout_ms),
        mutate: Duration::from_millis(config.replication.update_timeout_ms),
    };
    let peer_client = Arc::new(GrpcPeerClient::new(timeouts));
    let idm = Arc::new(InterDcManager::new(local.id.clone(), peers, peer_client));

    let default_params = params_from_config(&config.replication.params);
    let manager = Arc::new(ReplicaManager::new(
        local,
        values,
        registry,
        engine,
        idm,
        default_params,
    ));

    // Recovered keys get fresh policy state (strength is volatile)
    manager.bootstrap_policies().await;

    // Spawn the decay tick task
    spawn_decay_task(
        manager.clone(),
        DecayTaskConfig {
            tick_interval: Duration::from_millis(config.replication.tick_interval_ms),
        },
    );

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", metrics_port)
            .parse()
            .expect("valid metrics address");
        tokio::spawn(async move {
            if let Err(e) = tide_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Serve with graceful shutdown on Ctrl+C
    let router = build_server(manager);
    tracing::info!("serving gRPC on {}", config.listen);
    tokio::select! {
        result = router.serve(config.listen) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
