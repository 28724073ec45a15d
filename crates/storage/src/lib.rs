//! Durable local storage backend for tidekv: WAL + in-memory table.
//!
//! Each logical table (`data_item` for value blobs, `data_info` for replica
//! records) is backed by its own engine instance. Entries are
//! `{key, blob, tombstone, timestamp}`; the WAL provides durability and the
//! table provides fast reads. Per-key operations are transactional; there
//! are no multi-key transactions.

pub mod engine;
pub mod record;
pub mod table;
pub mod wal;

pub use engine::StorageEngine;
pub use record::StoreRecord;
pub use wal::FsyncPolicy;
