//! Write-Ahead Log (WAL) for durability.
//!
//! Format: each entry is `[4-byte CRC32][4-byte length][JSON payload]\n`.
//! On recovery, replay all valid entries in order; a corrupt or truncated
//! tail stops replay at the last valid entry.

use crate::record::StoreRecord;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    Always,
    /// Fsync periodically (caller controls).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// An append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    #[allow(dead_code)] // will be used for WAL rotation
    path: PathBuf,
    fsync: FsyncPolicy,
    entries_written: u64,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            fsync,
            entries_written: 0,
        })
    }

    /// Append a record to the WAL.
    pub fn append(&mut self, record: &StoreRecord) -> Result<(), WalError> {
        let payload = serde_json::to_vec(record)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        }

        self.entries_written += 1;
        Ok(())
    }

    /// Explicitly fsync the WAL (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Number of entries written since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Replay all valid entries from a WAL file, in write order.
    pub fn replay(path: &Path) -> Result<Vec<StoreRecord>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(WalError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // clean EOF
                Err(e) => return Err(WalError::Io(e)),
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            let payload = match read_entry_body(&mut reader) {
                Some(p) => p,
                None => {
                    tracing::warn!(
                        "WAL truncated mid-entry after {} entries; stopping replay",
                        records.len()
                    );
                    break;
                }
            };

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != expected_crc {
                tracing::warn!(
                    "WAL CRC mismatch at entry {}; stopping replay",
                    records.len()
                );
                break;
            }

            records.push(serde_json::from_slice(&payload)?);
        }

        Ok(records)
    }
}

/// Read `[len][payload][\n]` of one entry. Returns `None` on a truncated tail.
fn read_entry_body(reader: &mut impl Read) -> Option<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).ok()?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).ok()?;

    let mut nl = [0u8; 1];
    reader.read_exact(&mut nl).ok()?;

    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_record(key: &str, blob: &str) -> StoreRecord {
        StoreRecord::new(key.to_string(), blob.as_bytes().to_vec())
    }

    #[test]
    fn test_wal_write_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&test_record("k1", "v1")).unwrap();
            wal.append(&test_record("k2", "v2")).unwrap();
            wal.append(&test_record("k3", "v3")).unwrap();
            assert_eq!(wal.entries_written(), 3);
        }

        let records = Wal::replay(&wal_path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key, "k1");
        assert_eq!(records[1].key, "k2");
        assert_eq!(records[2].key, "k3");
        assert_eq!(records[0].blob, b"v1");
    }

    #[test]
    fn test_wal_replay_missing_file() {
        let dir = TempDir::new().unwrap();
        let records = Wal::replay(&dir.path().join("absent.wal")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_wal_replay_truncated_tail() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&test_record("k1", "v1")).unwrap();
            wal.append(&test_record("k2", "v2")).unwrap();
            wal.append(&test_record("k3", "v3")).unwrap();
        }

        // Chop a few bytes off the end to simulate a crash mid-append.
        {
            let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len - 5).unwrap();
        }

        let records = Wal::replay(&wal_path).unwrap();
        assert_eq!(
            records.len(),
            2,
            "should recover 2 of 3 entries after truncation"
        );
        assert_eq!(records[0].key, "k1");
        assert_eq!(records[1].key, "k2");
    }

    #[test]
    fn test_wal_replay_corrupt_crc() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("crc.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&test_record("k1", "v1")).unwrap();
            wal.append(&test_record("k2", "v2")).unwrap();
        }

        // Flip a payload byte in the second entry.
        {
            let mut bytes = std::fs::read(&wal_path).unwrap();
            let last = bytes.len() - 2;
            bytes[last] ^= 0xFF;
            std::fs::write(&wal_path, bytes).unwrap();
        }

        let records = Wal::replay(&wal_path).unwrap();
        assert_eq!(records.len(), 1, "replay stops at the corrupt entry");
        assert_eq!(records[0].key, "k1");
    }

    #[test]
    fn test_wal_tombstone_record() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("tomb.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&StoreRecord::tombstone("k1".to_string())).unwrap();
        }

        let records = Wal::replay(&wal_path).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].tombstone);
        assert!(records[0].blob.is_empty());
    }
}
