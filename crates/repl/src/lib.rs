//! Adaptive replication engine for tidekv.
//!
//! Provides: the per-key replica registry and value store, the
//! strength-decay strategy engine that drives replica admission/eviction,
//! the inter-DC fan-out manager, and the replica manager façade that
//! serializes client operations per key.

pub mod decay;
pub mod engine;
pub mod fanout;
pub mod manager;
pub mod params;
pub mod peer_client;
pub mod record;
pub mod registry;
pub mod strategy;
pub mod value_store;

pub use engine::StrategyEngine;
pub use fanout::InterDcManager;
pub use manager::ReplicaManager;
pub use params::{StrategyKind, StrategyParams};
pub use record::ReplicaRecord;
pub use registry::ReplicaRegistry;
pub use value_store::ValueStore;
