//! Per-key replication policies.
//!
//! A policy is a small state machine fed access and tick events; it only
//! emits [`Decision`]s. It never touches the registry, the value store, or
//! the network; the replica manager observes the decision and acts.

use crate::params::{StrategyKind, StrategyParams};

/// What the policy wants the replica manager to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoChange,
    /// This DC should acquire a local replica.
    ShouldReplicate,
    /// This DC may drop its local replica (manager enforces the
    /// last-replica guard).
    ShouldEvict,
}

/// Interface every policy variant implements.
pub trait Strategy {
    /// A local client read touched the key.
    fn on_read(&mut self) -> Decision;
    /// A local client write touched the key.
    fn on_write(&mut self) -> Decision;
    /// One engine tick elapsed.
    fn on_tick(&mut self) -> Decision;
    /// Idempotent bootstrap: identical params leave accrued state alone,
    /// changed params reinitialize it.
    fn reinit(&mut self, replicated: bool, params: &StrategyParams);

    fn strength(&self) -> f64;
    fn set_strength(&mut self, strength: f64);
    fn replicated(&self) -> bool;
    fn set_replicated(&mut self, replicated: bool);
    fn params(&self) -> &StrategyParams;
}

// ---------------------------------------------------------------------------
// Adaptive decay
// ---------------------------------------------------------------------------

/// The v1 policy: strength rises on local access, decays on a timer.
///
/// Admission and eviction are both inclusive at their thresholds: strength
/// exactly at `repl_threshold` admits, exactly at `rmv_threshold` evicts.
#[derive(Debug, Clone)]
pub struct AdaptiveDecay {
    strength: f64,
    replicated: bool,
    params: StrategyParams,
    ticks_since_decay: u64,
}

impl AdaptiveDecay {
    pub fn new(replicated: bool, params: StrategyParams) -> Self {
        let strength = if replicated {
            params.repl_threshold
        } else {
            0.0
        };
        Self {
            strength,
            replicated,
            params,
            ticks_since_decay: 0,
        }
    }

    fn accrue(&mut self, gain: f64) -> Decision {
        self.strength = (self.strength + gain).min(self.params.max_strength);
        if !self.replicated && self.strength >= self.params.repl_threshold {
            Decision::ShouldReplicate
        } else {
            Decision::NoChange
        }
    }
}

impl Strategy for AdaptiveDecay {
    fn on_read(&mut self) -> Decision {
        self.accrue(self.params.rstrength)
    }

    fn on_write(&mut self) -> Decision {
        self.accrue(self.params.wstrength)
    }

    fn on_tick(&mut self) -> Decision {
        self.ticks_since_decay += 1;
        if self.ticks_since_decay < self.params.decay_time {
            return Decision::NoChange;
        }
        self.ticks_since_decay = 0;
        self.strength = (self.strength - self.params.decay_factor).max(0.0);
        if self.replicated && self.strength <= self.params.rmv_threshold {
            Decision::ShouldEvict
        } else {
            Decision::NoChange
        }
    }

    fn reinit(&mut self, replicated: bool, params: &StrategyParams) {
        if *params != self.params {
            self.params = params.clone();
            self.strength = if replicated {
                self.params.repl_threshold
            } else {
                0.0
            };
            self.ticks_since_decay = 0;
        }
        self.replicated = replicated;
    }

    fn strength(&self) -> f64 {
        self.strength
    }

    fn set_strength(&mut self, strength: f64) {
        self.strength = strength.clamp(0.0, self.params.max_strength);
    }

    fn replicated(&self) -> bool {
        self.replicated
    }

    fn set_replicated(&mut self, replicated: bool) {
        self.replicated = replicated;
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }
}

// ---------------------------------------------------------------------------
// Tagged dispatch
// ---------------------------------------------------------------------------

/// The tagged policy variant stored per key.
#[derive(Debug, Clone)]
pub enum Policy {
    Adaptive(AdaptiveDecay),
}

impl Policy {
    pub fn new(kind: StrategyKind, replicated: bool, params: StrategyParams) -> Self {
        match kind {
            StrategyKind::AdaptiveDecay => Policy::Adaptive(AdaptiveDecay::new(replicated, params)),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Policy::Adaptive(_) => StrategyKind::AdaptiveDecay,
        }
    }

    fn inner(&self) -> &dyn Strategy {
        match self {
            Policy::Adaptive(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Strategy {
        match self {
            Policy::Adaptive(s) => s,
        }
    }
}

impl Strategy for Policy {
    fn on_read(&mut self) -> Decision {
        self.inner_mut().on_read()
    }

    fn on_write(&mut self) -> Decision {
        self.inner_mut().on_write()
    }

    fn on_tick(&mut self) -> Decision {
        self.inner_mut().on_tick()
    }

    fn reinit(&mut self, replicated: bool, params: &StrategyParams) {
        self.inner_mut().reinit(replicated, params)
    }

    fn strength(&self) -> f64 {
        self.inner().strength()
    }

    fn set_strength(&mut self, strength: f64) {
        self.inner_mut().set_strength(strength)
    }

    fn replicated(&self) -> bool {
        self.inner().replicated()
    }

    fn set_replicated(&mut self, replicated: bool) {
        self.inner_mut().set_replicated(replicated)
    }

    fn params(&self) -> &StrategyParams {
        self.inner().params()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

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
            wstrength: 30.0,
            min_dcs_number: 1,
        }
    }

    #[test]
    fn test_read_accrual_and_admission_inclusive() {
        let mut s = AdaptiveDecay::new(false, params());
        assert_eq!(s.on_read(), Decision::NoChange);
        assert_eq!(s.strength(), 60.0);
        // 120 >= 100: admit
        assert_eq!(s.on_read(), Decision::ShouldReplicate);
        assert_eq!(s.strength(), 120.0);
    }

    #[test]
    fn test_admission_at_exact_threshold() {
        let mut p = params();
        p.rstrength = 50.0;
        let mut s = AdaptiveDecay::new(false, p);
        assert_eq!(s.on_read(), Decision::NoChange); // 50
        assert_eq!(s.on_read(), Decision::ShouldReplicate); // exactly 100
    }

    #[test]
    fn test_write_accrual_uses_wstrength() {
        let mut s = AdaptiveDecay::new(false, params());
        s.on_write();
        assert_eq!(s.strength(), 30.0);
    }

    #[test]
    fn test_strength_clamped_to_max() {
        let mut s = AdaptiveDecay::new(false, params());
        for _ in 0..10 {
            s.on_read();
        }
        assert_eq!(s.strength(), 200.0);
    }

    #[test]
    fn test_replicated_key_never_asks_to_replicate() {
        let mut s = AdaptiveDecay::new(true, params());
        assert_eq!(s.on_read(), Decision::NoChange);
        assert!(s.strength() > 100.0);
    }

    #[test]
    fn test_decay_to_eviction_inclusive() {
        let mut s = AdaptiveDecay::new(true, params());
        s.set_strength(120.0);
        assert_eq!(s.on_tick(), Decision::NoChange); // 70
        assert_eq!(s.on_tick(), Decision::ShouldEvict); // exactly 20
        assert_eq!(s.strength(), 20.0);
    }

    #[test]
    fn test_decay_floors_at_zero() {
        let mut s = AdaptiveDecay::new(false, params());
        s.on_tick();
        assert_eq!(s.strength(), 0.0);
        s.on_tick();
        assert_eq!(s.strength(), 0.0);
    }

    #[test]
    fn test_decay_time_spans_multiple_ticks() {
        let mut p = params();
        p.decay_time = 3;
        let mut s = AdaptiveDecay::new(true, p);
        s.set_strength(120.0);
        assert_eq!(s.on_tick(), Decision::NoChange);
        assert_eq!(s.on_tick(), Decision::NoChange);
        assert_eq!(s.strength(), 120.0, "no decay before decay_time ticks");
        s.on_tick();
        assert_eq!(s.strength(), 70.0);
    }

    #[test]
    fn test_non_replica_decays_but_never_evicts() {
        let mut s = AdaptiveDecay::new(false, params());
        s.set_strength(60.0);
        assert_eq!(s.on_tick(), Decision::NoChange); // 10, below rmv, not replicated
        assert_eq!(s.strength(), 10.0);
    }

    #[test]
    fn test_non_replica_keeps_accruing_for_later_acquisition() {
        let mut s = AdaptiveDecay::new(false, params());
        s.on_read(); // 60
        s.on_tick(); // 10
        s.on_read(); // 70
        s.on_read(); // 130 -> admit
        assert_eq!(s.on_read(), Decision::ShouldReplicate);
    }

    #[test]
    fn test_reinit_identical_params_preserves_strength() {
        let p = params();
        let mut s = AdaptiveDecay::new(false, p.clone());
        s.on_read();
        let before = s.strength();
        s.reinit(false, &p);
        assert_eq!(s.strength(), before);
        s.reinit(false, &p);
        assert_eq!(s.strength(), before, "idempotent under repetition");
    }

    #[test]
    fn test_reinit_changed_params_resets() {
        let mut s = AdaptiveDecay::new(false, params());
        s.on_read();
        let mut p2 = params();
        p2.repl_threshold = 300.0;
        p2.max_strength = 400.0;
        s.reinit(true, &p2);
        assert_eq!(s.strength(), 300.0, "reset to new repl_threshold");
        assert!(s.replicated());
    }

    #[test]
    fn test_set_strength_clamps() {
        let mut s = AdaptiveDecay::new(false, params());
        s.set_strength(500.0);
        assert_eq!(s.strength(), 200.0);
        s.set_strength(-5.0);
        assert_eq!(s.strength(), 0.0);
    }

    #[test]
    fn test_policy_dispatch() {
        let mut p = Policy::new(StrategyKind::AdaptiveDecay, false, params());
        assert_eq!(p.kind(), StrategyKind::AdaptiveDecay);
        p.on_read();
        assert_eq!(p.strength(), 60.0);
    }
}
