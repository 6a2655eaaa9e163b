//! Per-client integrity chains and batch storage.
//!
//! Every accepted batch appends a record to its client's hash chain. The
//! ingest path is a single-writer transaction: the batch file is written
//! and fsynced, the chain record appended, and the integrity database
//! atomically replaced before the caller acknowledges. The tamper signal
//! is a batch timestamp behind the client's last record.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use citadel_core::digest::sha256_hex;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Integrity database file inside the storage directory.
pub const INTEGRITY_DB_FILE: &str = "integrity.db";

/// Number of chain hashes returned by integrity reports.
const REPORT_CHAIN_LEN: usize = 10;

/// One link of a client's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the batch bytes.
    pub log_hash: String,
    /// Chain advance: `sha256(prev.log_hash ∥ log_hash)`; the first record
    /// carries its own `log_hash`.
    pub chain_hash: String,
    /// Batch file name under the client's storage directory.
    pub filename: String,
    /// Batch size in bytes.
    pub size: u64,
}

/// Integrity report for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub client_id: String,
    pub total_logs: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub integrity_status: String,
    /// The last ten batch hashes, oldest first.
    pub hash_chain: Vec<String>,
}

/// Per-client chains plus the batch store, persisted under the storage
/// directory.
#[derive(Debug)]
pub struct ChainStore {
    storage: PathBuf,
    chains: RwLock<BTreeMap<String, Vec<ChainRecord>>>,
}

impl ChainStore {
    /// Open the store, loading the integrity database if present.
    pub fn open(storage: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let storage = storage.into();
        fs::create_dir_all(&storage)?;
        let chains = match fs::read(storage.join(INTEGRITY_DB_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            storage,
            chains: RwLock::new(chains),
        })
    }

    /// Ingest one verified batch for `client_id` at `timestamp`.
    ///
    /// Rejects timestamp regressions against the client's last record
    /// without advancing the chain. On success the batch is stored at
    /// `<storage>/<client_id>/<ts>.log` and the chain record is durable
    /// before returning.
    pub fn ingest(
        &self,
        client_id: &str,
        batch: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<ChainRecord, ServerError> {
        let mut chains = self.chains.write();
        let chain = chains.entry(client_id.to_string()).or_default();

        if let Some(previous) = chain.last() {
            if timestamp < previous.timestamp {
                return Err(ServerError::TamperSuspected {
                    client_id: client_id.to_string(),
                    reason: format!(
                        "batch timestamp {timestamp} behind last record {}",
                        previous.timestamp
                    ),
                });
            }
        }

        let log_hash = sha256_hex(batch);
        let chain_hash = match chain.last() {
            Some(previous) => sha256_hex(format!("{}{log_hash}", previous.log_hash).as_bytes()),
            None => log_hash.clone(),
        };

        let filename = format!("{}.log", timestamp.format("%Y%m%dT%H%M%S%.3fZ"));
        let client_dir = self.storage.join(client_id);
        fs::create_dir_all(&client_dir)?;
        let mut file = fs::File::create(client_dir.join(&filename))?;
        file.write_all(batch)?;
        file.sync_all()?;

        let record = ChainRecord {
            timestamp,
            log_hash,
            chain_hash,
            filename,
            size: batch.len() as u64,
        };
        chain.push(record.clone());
        self.persist(&chains)?;

        tracing::info!(client_id, filename = %record.filename, size = record.size, "batch accepted");
        Ok(record)
    }

    /// Integrity report for `client_id` (empty chain if unknown).
    pub fn report(&self, client_id: &str) -> IntegrityReport {
        let chains = self.chains.read();
        let chain = chains.get(client_id).map(Vec::as_slice).unwrap_or(&[]);
        let tail = &chain[chain.len().saturating_sub(REPORT_CHAIN_LEN)..];
        IntegrityReport {
            client_id: client_id.to_string(),
            total_logs: chain.len(),
            last_update: chain.last().map(|record| record.timestamp),
            integrity_status: "verified".to_string(),
            hash_chain: tail.iter().map(|record| record.log_hash.clone()).collect(),
        }
    }

    /// Chain length for `client_id`.
    pub fn chain_len(&self, client_id: &str) -> usize {
        self.chains.read().get(client_id).map_or(0, Vec::len)
    }

    /// Path of a stored batch file.
    pub fn batch_path(&self, client_id: &str, filename: &str) -> PathBuf {
        self.storage.join(client_id).join(filename)
    }

    /// Atomically replace the integrity database.
    fn persist(&self, chains: &BTreeMap<String, Vec<ChainRecord>>) -> Result<(), ServerError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.storage)?;
        serde_json::to_writer_pretty(&mut tmp, chains)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.storage.join(INTEGRITY_DB_FILE))
            .map_err(|err| ServerError::Io(err.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_chain_advances_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();

        let first = store.ingest("node-a", b"batch one", at(100)).unwrap();
        let second = store.ingest("node-a", b"batch two", at(200)).unwrap();

        assert_eq!(first.log_hash, sha256_hex(b"batch one"));
        assert_eq!(first.chain_hash, first.log_hash);
        assert_eq!(
            second.chain_hash,
            sha256_hex(format!("{}{}", first.log_hash, second.log_hash).as_bytes())
        );

        // Batches are on disk.
        assert_eq!(
            fs::read(store.batch_path("node-a", &first.filename)).unwrap(),
            b"batch one"
        );

        // The database survives a reopen.
        drop(store);
        let reopened = ChainStore::open(dir.path()).unwrap();
        assert_eq!(reopened.chain_len("node-a"), 2);
        let report = reopened.report("node-a");
        assert_eq!(report.total_logs, 2);
        assert_eq!(report.hash_chain.len(), 2);
        assert_eq!(report.last_update.unwrap(), at(200));
    }

    #[test]
    fn test_timestamp_regression_is_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();

        store.ingest("node-a", b"one", at(100)).unwrap();
        store.ingest("node-a", b"two", at(200)).unwrap();

        let err = store.ingest("node-a", b"three", at(150)).unwrap_err();
        assert!(matches!(err, ServerError::TamperSuspected { .. }));

        // The chain did not advance.
        assert_eq!(store.chain_len("node-a"), 2);
        let report = store.report("node-a");
        assert_eq!(report.total_logs, 2);
    }

    #[test]
    fn test_equal_timestamp_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        store.ingest("node-a", b"one", at(100)).unwrap();
        store.ingest("node-a", b"two", at(100)).unwrap();
        assert_eq!(store.chain_len("node-a"), 2);
    }

    #[test]
    fn test_clients_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        store.ingest("node-a", b"a", at(500)).unwrap();
        // A lower timestamp from a different client is unrelated.
        store.ingest("node-b", b"b", at(100)).unwrap();
        assert_eq!(store.chain_len("node-a"), 1);
        assert_eq!(store.chain_len("node-b"), 1);
    }

    #[test]
    fn test_report_caps_chain_at_ten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        for i in 0..15i64 {
            store
                .ingest("node-a", format!("batch-{i}").as_bytes(), at(1000 + i))
                .unwrap();
        }
        let report = store.report("node-a");
        assert_eq!(report.total_logs, 15);
        assert_eq!(report.hash_chain.len(), 10);
        assert_eq!(
            report.hash_chain[9],
            sha256_hex(b"batch-14"),
            "newest hash is last"
        );
    }

    #[test]
    fn test_unknown_client_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let report = store.report("ghost");
        assert_eq!(report.total_logs, 0);
        assert!(report.hash_chain.is_empty());
        assert!(report.last_update.is_none());
    }
}
