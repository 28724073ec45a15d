//! Per-key replication policy parameters and the policy selector tag.

use serde::{Deserialize, Serialize};

/// Parameters governing one key's replication policy.
///
/// Effectively immutable after creation; reconfiguration goes through a
/// separate administrative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Ticks between automatic strength decrements.
    pub decay_time: u64,
    /// Strength decrement applied per decay.
    pub decay_factor: f64,
    /// Strength at or above which a non-replica DC acquires a replica.
    pub repl_threshold: f64,
    /// Strength at or below which a replica DC may drop its copy.
    pub rmv_threshold: f64,
    /// Upper clamp on strength.
    pub max_strength: f64,
    /// Strength gain per local read.
    pub rstrength: f64,
    /// Strength gain per local write.
    pub wstrength: f64,
    /// Minimum number of DCs holding a replica at creation time.
    pub min_dcs_number: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            decay_time: 1,
            decay_factor: 50.0,
            repl_threshold: 100.0,
            rmv_threshold: 20.0,
            max_strength: 1000.0,
            rstrength: 60.0,
            wstrength: 60.0,
            min_dcs_number: 1,
        }
    }
}

/// Selector for the policy variant governing a key.
///
/// Adding a policy means adding a variant here and a matching arm in
/// [`crate::strategy::Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    AdaptiveDecay,
}

impl StrategyKind {
    /// Wire tag for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::AdaptiveDecay => "adaptive",
        }
    }

    /// Parse a wire tag. Empty selects the default policy.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "" | "adaptive" => Some(StrategyKind::AdaptiveDecay),
            _ => None,
        }
    }
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::AdaptiveDecay
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_roundtrip() {
        assert_eq!(
            StrategyKind::from_tag("adaptive"),
            Some(StrategyKind::AdaptiveDecay)
        );
        assert_eq!(StrategyKind::from_tag(""), Some(StrategyKind::AdaptiveDecay));
        assert_eq!(StrategyKind::from_tag("bogus"), None);
        assert_eq!(StrategyKind::AdaptiveDecay.as_str(), "adaptive");
    }

    #[test]
    fn test_params_serde_roundtrip() {
        let params = StrategyParams {
            decay_time: 3,
            ..StrategyParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: StrategyParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
