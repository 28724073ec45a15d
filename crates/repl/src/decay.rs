//! Background task driving strength decay and replica eviction.
//!
//! Ticks the strategy engine on a fixed interval; every `ShouldEvict`
//! decision goes back through the replica manager, which enforces the
//! last-replica guard before dropping anything.

use crate::manager::ReplicaManager;
use crate::peer_client::PeerClient;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Configuration for the decay background task.
#[derive(Debug, Clone)]
pub struct DecayTaskConfig {
    /// One engine tick per interval; a key's `decay_time` counts these.
    pub tick_interval: Duration,
}

impl Default for DecayTaskConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Spawn the decay tick task.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_decay_task<C: PeerClient>(
    manager: Arc<ReplicaManager<C>>,
    config: DecayTaskConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            manager.run_decay_cycle().await;
        }
    })
}
