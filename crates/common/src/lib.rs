//! tide-common: shared types for the tidekv project.
//!
//! Provides the `DcId` / `DcInfo` identity types, the `UpdateStamp`
//! last-writer-wins ordering stamp, and the shared `ReplError` enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// DcId
// ---------------------------------------------------------------------------

/// Stable identifier of a participating data center.
///
/// DC identities come from configuration (one per line in the DC list file)
/// and never change over a node's lifetime.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DcId(String);

impl DcId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DcId({})", self.0)
    }
}

impl fmt::Display for DcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DcId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// DcInfo
// ---------------------------------------------------------------------------

/// Descriptor for a peer data center: identity plus network address.
#[derive(Debug, Clone)]
pub struct DcInfo {
    pub id: DcId,
    /// Network address (used by real transports; placeholder in mocked tests).
    pub addr: SocketAddr,
}

impl DcInfo {
    pub fn new(id: DcId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// Create a `DcInfo` with a dummy address (useful for testing).
    pub fn with_dummy_addr(id: impl Into<String>) -> Self {
        Self::new(DcId::new(id), "127.0.0.1:0".parse().unwrap())
    }
}

impl PartialEq for DcInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DcInfo {}

impl std::hash::Hash for DcInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// UpdateStamp
// ---------------------------------------------------------------------------

/// Ordering stamp attached to every update fan-out.
///
/// Comparison is lexicographic over `(wall_ms, seq, dc)`: wall-clock time
/// decides the winner, equal clocks fall back to the per-DC sequence, and a
/// full tie breaks deterministically on the DC id. Every DC applying the
/// same set of stamped updates therefore converges on the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateStamp {
    pub wall_ms: u64,
    pub seq: u64,
    pub dc: DcId,
}

impl UpdateStamp {
    /// The zero stamp, older than any stamp a node can issue.
    pub fn zero(dc: DcId) -> Self {
        Self {
            wall_ms: 0,
            seq: 0,
            dc,
        }
    }
}

impl fmt::Display for UpdateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms/{}@{}", self.wall_ms, self.seq, self.dc)
    }
}

/// Issues `UpdateStamp`s for the local DC.
///
/// The sequence counter makes stamps issued by one DC strictly increasing
/// even when the wall clock stalls or steps backwards.
#[derive(Debug)]
pub struct StampClock {
    dc: DcId,
    seq: AtomicU64,
}

impl StampClock {
    pub fn new(dc: DcId) -> Self {
        Self {
            dc,
            seq: AtomicU64::new(0),
        }
    }

    /// Issue the next stamp.
    pub fn stamp(&self) -> UpdateStamp {
        let wall_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        UpdateStamp {
            wall_ms,
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            dc: self.dc.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by client-visible replication operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplError {
    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    AlreadyExists,

    #[error("no replica held for key")]
    NoReplica,

    #[error("RPC timeout contacting {0}")]
    Timeout(DcId),

    #[error("no reachable replica DCs")]
    NoDcs,

    #[error("verification failed: {0}")]
    FailedVerification(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_ordering_by_wall_clock() {
        let a = UpdateStamp {
            wall_ms: 100,
            seq: 9,
            dc: DcId::new("zurich"),
        };
        let b = UpdateStamp {
            wall_ms: 200,
            seq: 1,
            dc: DcId::new("ashburn"),
        };
        assert!(a < b, "later wall clock wins regardless of seq and dc");
    }

    #[test]
    fn test_stamp_ordering_seq_breaks_equal_clock() {
        let a = UpdateStamp {
            wall_ms: 100,
            seq: 1,
            dc: DcId::new("zurich"),
        };
        let b = UpdateStamp {
            wall_ms: 100,
            seq: 2,
            dc: DcId::new("ashburn"),
        };
        assert!(a < b);
    }

    #[test]
    fn test_stamp_ordering_dc_breaks_full_tie() {
        let a = UpdateStamp {
            wall_ms: 100,
            seq: 1,
            dc: DcId::new("ashburn"),
        };
        let b = UpdateStamp {
            wall_ms: 100,
            seq: 1,
            dc: DcId::new("zurich"),
        };
        assert!(a < b, "lexicographic DC id is the final tie-break");
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_stamp_is_oldest() {
        let clock = StampClock::new(DcId::new("dc-a"));
        let zero = UpdateStamp::zero(DcId::new("zzz"));
        assert!(zero < clock.stamp());
    }

    #[test]
    fn test_stamp_clock_monotonic() {
        let clock = StampClock::new(DcId::new("dc-a"));
        let s1 = clock.stamp();
        let s2 = clock.stamp();
        let s3 = clock.stamp();
        assert!(s1 < s2);
        assert!(s2 < s3);
    }

    #[test]
    fn test_dc_info_equality_is_by_id() {
        let a = DcInfo::new(DcId::new("dc-a"), "10.0.0.1:7000".parse().unwrap());
        let b = DcInfo::new(DcId::new("dc-a"), "10.0.0.2:7000".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_serde_roundtrip() {
        let stamp = UpdateStamp {
            wall_ms: 42,
            seq: 7,
            dc: DcId::new("dc-b"),
        };
        let json = serde_json::to_string(&stamp).unwrap();
        let back: UpdateStamp = serde_json::from_str(&json).unwrap();
        assert_eq!(stamp, back);

        let id = DcId::new("dc-a");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"dc-a\"");
    }
}
