//! Strategy engine: one policy state machine per key.
//!
//! The engine owns all per-key policy state and nothing else. Callers
//! (the replica manager and the decay task) feed it events and act on the
//! returned decisions.

use crate::params::{StrategyKind, StrategyParams};
use crate::strategy::{Decision, Policy, Strategy};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct StrategyEngine {
    states: HashMap<String, Policy>,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Idempotent bootstrap of a key's policy. A different `kind` replaces
    /// the policy wholesale; identical `(kind, params)` leaves accrued
    /// strength untouched.
    pub fn init_strategy(
        &mut self,
        key: &str,
        kind: StrategyKind,
        replicated: bool,
        params: &StrategyParams,
    ) {
        match self.states.get_mut(key) {
            Some(policy) if policy.kind() == kind => {
                policy.reinit(replicated, params);
            }
            _ => {
                self.states
                    .insert(key.to_string(), Policy::new(kind, replicated, params.clone()));
            }
        }
    }

    /// Feed a local client read. Unknown keys are a no-op.
    pub fn local_read(&mut self, key: &str) -> Decision {
        match self.states.get_mut(key) {
            Some(policy) => policy.on_read(),
            None => Decision::NoChange,
        }
    }

    /// Feed a local client write. Unknown keys are a no-op.
    pub fn local_write(&mut self, key: &str) -> Decision {
        match self.states.get_mut(key) {
            Some(policy) => policy.on_write(),
            None => Decision::NoChange,
        }
    }

    /// Advance every key by one tick. Returns the keys whose policy asked
    /// for action.
    pub fn tick_all(&mut self) -> Vec<(String, Decision)> {
        let mut out = Vec::new();
        for (key, policy) in &mut self.states {
            let decision = policy.on_tick();
            if decision != Decision::NoChange {
                out.push((key.clone(), decision));
            }
        }
        out
    }

    /// The key was admitted as a local replica: strength restarts at the
    /// admission threshold.
    pub fn on_acquired(&mut self, key: &str) {
        if let Some(policy) = self.states.get_mut(key) {
            policy.set_replicated(true);
            let threshold = policy.params().repl_threshold;
            policy.set_strength(threshold);
        }
    }

    /// The local replica was dropped: strength resets to zero.
    pub fn on_evicted(&mut self, key: &str) {
        if let Some(policy) = self.states.get_mut(key) {
            policy.set_replicated(false);
            policy.set_strength(0.0);
        }
    }

    pub fn strength(&self, key: &str) -> Option<f64> {
        self.states.get(key).map(|p| p.strength())
    }

    pub fn remove(&mut self, key: &str) {
        self.states.remove(key);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StrategyParams {
        StrategyParams {
            decay_time: 1,
            decay_factor: 50.0,
            repl_threshold: 100.0,
            rmv_threshold: 20.0,
            max_strength: 200.0,
            rstrength: 60.0,
            wstrength: 60.0,
            min_dcs_number: 1,
        }
    }

    #[test]
    fn test_unknown_key_is_noop() {
        let mut engine = StrategyEngine::new();
        assert_eq!(engine.local_read("ghost"), Decision::NoChange);
        assert_eq!(engine.local_write("ghost"), Decision::NoChange);
        assert!(engine.strength("ghost").is_none());
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut engine = StrategyEngine::new();
        let p = params();
        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &p);
        engine.local_read("k");
        let before = engine.strength("k").unwrap();

        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &p);
        assert_eq!(engine.strength("k").unwrap(), before);
    }

    #[test]
    fn test_init_with_changed_params_resets() {
        let mut engine = StrategyEngine::new();
        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &params());
        engine.local_read("k");

        let mut p2 = params();
        p2.rstrength = 10.0;
        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &p2);
        assert_eq!(engine.strength("k").unwrap(), 0.0);
    }

    #[test]
    fn test_tick_all_reports_only_actionable() {
        let mut engine = StrategyEngine::new();
        let p = params();
        // Replicated key near the eviction threshold.
        engine.init_strategy("cold", StrategyKind::AdaptiveDecay, true, &p);
        // Non-replicated key with no strength: decays silently.
        engine.init_strategy("idle", StrategyKind::AdaptiveDecay, false, &p);

        let decisions = engine.tick_all();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0, "cold");
        assert_eq!(decisions[0].1, Decision::ShouldEvict);
    }

    #[test]
    fn test_acquire_and_evict_transitions() {
        let mut engine = StrategyEngine::new();
        let p = params();
        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &p);
        engine.local_read("k");
        engine.local_read("k");

        engine.on_acquired("k");
        assert_eq!(engine.strength("k").unwrap(), p.repl_threshold);

        engine.on_evicted("k");
        assert_eq!(engine.strength("k").unwrap(), 0.0);
    }

    #[test]
    fn test_remove() {
        let mut engine = StrategyEngine::new();
        engine.init_strategy("k", StrategyKind::AdaptiveDecay, false, &params());
        assert_eq!(engine.len(), 1);
        engine.remove("k");
        assert!(engine.is_empty());
    }
}
