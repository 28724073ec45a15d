//! Configuration schema and loader for tidekv nodes.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This data center's identity.
    pub dc_id: String,

    /// This node's listen address.
    pub listen: SocketAddr,

    /// Peer DCs, inline.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,

    /// Optional DC list file: one `<id> <address>` pair per line,
    /// `#` starts a comment. Merged with the inline peer list.
    #[serde(default)]
    pub peers_file: Option<PathBuf>,

    /// Replication engine settings.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// One peer data center.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Strategy tick period in milliseconds (one SE tick per interval).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Timeout for query RPCs (remote reads) in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Timeout for state-changing RPCs (updates, pushes, evicts) in milliseconds.
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    /// Default per-key strategy parameters, used when a client create
    /// omits them.
    #[serde(default)]
    pub params: ParamsConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            update_timeout_ms: default_update_timeout_ms(),
            params: ParamsConfig::default(),
        }
    }
}

/// Strategy parameter defaults (see the strategy engine for semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Ticks between automatic strength decrements.
    #[serde(default = "default_decay_time")]
    pub decay_time: u64,

    /// Strength decrement applied per decay.
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Strength at or above which a non-replica DC acquires a replica.
    #[serde(default = "default_repl_threshold")]
    pub repl_threshold: f64,

    /// Strength at or below which a replica DC may drop its copy.
    #[serde(default = "default_rmv_threshold")]
    pub rmv_threshold: f64,

    /// Upper clamp on strength.
    #[serde(default = "default_max_strength")]
    pub max_strength: f64,

    /// Strength gain per local read.
    #[serde(default = "default_rstrength")]
    pub rstrength: f64,

    /// Strength gain per local write.
    #[serde(default = "default_wstrength")]
    pub wstrength: f64,

    /// Minimum number of DCs holding a replica at creation time.
    #[serde(default = "default_min_dcs_number")]
    pub min_dcs_number: usize,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            decay_time: default_decay_time(),
            decay_factor: default_decay_factor(),
            repl_threshold: default_repl_threshold(),
            rmv_threshold: default_rmv_threshold(),
            max_strength: default_max_strength(),
            rstrength: default_rstrength(),
            wstrength: default_wstrength(),
            min_dcs_number: default_min_dcs_number(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for WAL files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

// --- Defaults ---

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_query_timeout_ms() -> u64 {
    1000
}
fn default_update_timeout_ms() -> u64 {
    5000
}
fn default_decay_time() -> u64 {
    1
}
fn default_decay_factor() -> f64 {
    50.0
}
fn default_repl_threshold() -> f64 {
    100.0
}
fn default_rmv_threshold() -> f64 {
    20.0
}
fn default_max_strength() -> f64 {
    1000.0
}
fn default_rstrength() -> f64 {
    60.0
}
fn default_wstrength() -> f64 {
    60.0
}
fn default_min_dcs_number() -> usize {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dc_id.is_empty() {
            return Err(ConfigError::Invalid("dc_id must not be empty".into()));
        }
        let p = &self.replication.params;
        if p.decay_time == 0 {
            return Err(ConfigError::Invalid("params.decay_time must be > 0".into()));
        }
        if p.rmv_threshold >= p.repl_threshold {
            return Err(ConfigError::Invalid(format!(
                "params.rmv_threshold ({}) must be < params.repl_threshold ({})",
                p.rmv_threshold, p.repl_threshold
            )));
        }
        if p.max_strength < p.repl_threshold {
            return Err(ConfigError::Invalid(format!(
                "params.max_strength ({}) must be >= params.repl_threshold ({})",
                p.max_strength, p.repl_threshold
            )));
        }
        if p.min_dcs_number == 0 {
            return Err(ConfigError::Invalid(
                "params.min_dcs_number must be > 0".into(),
            ));
        }
        if self.replication.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.tick_interval_ms must be > 0".into(),
            ));
        }
        for peer in &self.peers {
            if peer.id == self.dc_id {
                return Err(ConfigError::Invalid(format!(
                    "peer id '{}' collides with dc_id",
                    peer.id
                )));
            }
        }
        Ok(())
    }

    /// All configured peers: inline entries plus the DC list file, if any.
    pub fn resolved_peers(&self) -> Result<Vec<PeerEntry>, ConfigError> {
        let mut peers = self.peers.clone();
        if let Some(ref path) = self.peers_file {
            peers.extend(load_dc_list(path)?);
        }
        let mut seen = std::collections::HashSet::new();
        for peer in &peers {
            if peer.id == self.dc_id {
                return Err(ConfigError::Invalid(format!(
                    "peer id '{}' collides with dc_id",
                    peer.id
                )));
            }
            if !seen.insert(peer.id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer id '{}'",
                    peer.id
                )));
            }
        }
        Ok(peers)
    }
}

/// Parse a DC list file: one `<id> <address>` pair per line.
pub fn load_dc_list(path: &Path) -> Result<Vec<PeerEntry>, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut peers = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(address), None) => peers.push(PeerEntry {
                id: id.to_string(),
                address: address.to_string(),
            }),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "DC list line {} must be '<id> <address>': {:?}",
                    lineno + 1,
                    line
                )))
            }
        }
    }
    Ok(peers)
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: NodeConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
