//! On-disk record format.

use serde::{Deserialize, Serialize};

/// A single WAL entry: the full state of one key at write time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRecord {
    /// The key (opaque string).
    pub key: String,
    /// Blob bytes (empty if tombstone).
    pub blob: Vec<u8>,
    /// Whether this entry removes the key.
    pub tombstone: bool,
    /// Wall-clock timestamp (millis since epoch).
    pub timestamp_ms: u64,
}

impl StoreRecord {
    /// Create a new live record.
    pub fn new(key: String, blob: Vec<u8>) -> Self {
        Self {
            key,
            blob,
            tombstone: false,
            timestamp_ms: now_ms(),
        }
    }

    /// Create a tombstone record.
    pub fn tombstone(key: String) -> Self {
        Self {
            key,
            blob: Vec::new(),
            tombstone: true,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
