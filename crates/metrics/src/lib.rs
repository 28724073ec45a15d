//! Metrics and tracing setup for tidekv.
//!
//! Provides a global [`DcMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<DcMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static DcMetrics {
    METRICS.get_or_init(DcMetrics::new)
}

/// All Prometheus metrics for a tidekv DC node.
pub struct DcMetrics {
    pub registry: Registry,

    // ── Client operation counters ──
    pub client_ops: IntCounterVec,

    // ── Client operation latency ──
    pub client_latency_secs: HistogramVec,

    // ── Inter-DC RPC counters ──
    pub rpcs_sent: IntCounter,
    pub rpcs_received: IntCounter,
    pub rpcs_sent_by_type: IntCounterVec,
    pub rpcs_received_by_type: IntCounterVec,

    // ── Inter-DC RPC latency ──
    pub rpc_latency_secs: HistogramVec,

    // ── Replication lifecycle ──
    pub replicas_acquired: IntCounter,
    pub replicas_evicted: IntCounter,
    pub last_replica_retained: IntCounter,
    pub replicas_held: IntGauge,

    // ── Convergence ──
    pub stale_updates_dropped: IntCounter,
    pub fanout_failures: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for DcMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for RPC/client latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

impl DcMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let client_ops = IntCounterVec::new(
            Opts::new("tide_client_ops_total", "Client operations, by type"),
            &["op_type"],
        )
        .expect("client_ops counter vec");

        let client_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "tide_client_latency_seconds",
                "Client operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op_type"],
        )
        .expect("client_latency_secs histogram");

        let rpcs_sent = IntCounter::with_opts(Opts::new(
            "tide_rpcs_sent_total",
            "Total outbound inter-DC RPCs sent",
        ))
        .expect("rpcs_sent counter");
        let rpcs_received = IntCounter::with_opts(Opts::new(
            "tide_rpcs_received_total",
            "Total inbound inter-DC RPCs received",
        ))
        .expect("rpcs_received counter");

        let rpcs_sent_by_type = IntCounterVec::new(
            Opts::new("tide_rpcs_sent_by_type_total", "Outbound RPCs sent, by type"),
            &["rpc_type"],
        )
        .expect("rpcs_sent_by_type counter vec");
        let rpcs_received_by_type = IntCounterVec::new(
            Opts::new(
                "tide_rpcs_received_by_type_total",
                "Inbound RPCs received, by type",
            ),
            &["rpc_type"],
        )
        .expect("rpcs_received_by_type counter vec");

        let rpc_latency_secs = HistogramVec::new(
            HistogramOpts::new("tide_rpc_latency_seconds", "Inter-DC RPC latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["rpc_type", "direction"],
        )
        .expect("rpc_latency_secs histogram");

        let replicas_acquired = IntCounter::with_opts(Opts::new(
            "tide_replicas_acquired_total",
            "Replicas admitted locally (by pressure or push)",
        ))
        .expect("replicas_acquired counter");
        let replicas_evicted = IntCounter::with_opts(Opts::new(
            "tide_replicas_evicted_total",
            "Replicas dropped locally (by decay or client request)",
        ))
        .expect("replicas_evicted counter");
        let last_replica_retained = IntCounter::with_opts(Opts::new(
            "tide_last_replica_retained_total",
            "Evictions refused because this DC held the last replica",
        ))
        .expect("last_replica_retained counter");
        let replicas_held = IntGauge::with_opts(Opts::new(
            "tide_replicas_held",
            "Keys currently replicated at this DC",
        ))
        .expect("replicas_held gauge");

        let stale_updates_dropped = IntCounter::with_opts(Opts::new(
            "tide_stale_updates_dropped_total",
            "Inbound updates dropped by last-writer-wins ordering",
        ))
        .expect("stale_updates_dropped counter");
        let fanout_failures = IntCounter::with_opts(Opts::new(
            "tide_fanout_failures_total",
            "Per-target failures during best-effort fan-out",
        ))
        .expect("fanout_failures counter");

        for collector in [
            Box::new(client_ops.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(client_latency_secs.clone()),
            Box::new(rpcs_sent.clone()),
            Box::new(rpcs_received.clone()),
            Box::new(rpcs_sent_by_type.clone()),
            Box::new(rpcs_received_by_type.clone()),
            Box::new(rpc_latency_secs.clone()),
            Box::new(replicas_acquired.clone()),
            Box::new(replicas_evicted.clone()),
            Box::new(last_replica_retained.clone()),
            Box::new(replicas_held.clone()),
            Box::new(stale_updates_dropped.clone()),
            Box::new(fanout_failures.clone()),
        ] {
            registry.register(collector).expect("register metric");
        }

        Self {
            registry,
            client_ops,
            client_latency_secs,
            rpcs_sent,
            rpcs_received,
            rpcs_sent_by_type,
            rpcs_received_by_type,
            rpc_latency_secs,
            replicas_acquired,
            replicas_evicted,
            last_replica_retained,
            replicas_held,
            stale_updates_dropped,
            fanout_failures,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start an RPC latency timer. Returns a guard that records
/// elapsed time on drop.
pub fn start_rpc_timer(rpc_type: &str, direction: &str) -> prometheus::HistogramTimer {
    metrics()
        .rpc_latency_secs
        .with_label_values(&[rpc_type, direction])
        .start_timer()
}

/// Helper: start a client operation latency timer.
pub fn start_client_timer(op_type: &str) -> prometheus::HistogramTimer {
    metrics()
        .client_latency_secs
        .with_label_values(&[op_type])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
