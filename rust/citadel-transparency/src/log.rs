//! The persisted transparency log: journal, root pointer, and queries.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use citadel_core::digest::sha256_hex;
use citadel_core::to_canonical_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LogError;
use crate::merkle::{InclusionProof, MerkleTree};

/// Journal of entries, one canonical-JSON line each.
pub const ENTRIES_FILE: &str = "entries.jsonl";

/// Root pointer: `{tree_size, root_hash, timestamp}`.
pub const TREE_FILE: &str = "merkle-tree.json";

/// Log identity and metadata.
pub const CONFIG_FILE: &str = "config.json";

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    UpdateRelease,
    RolloutEvent,
    SecurityEvent,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::UpdateRelease => write!(f, "update_release"),
            EntryType::RolloutEvent => write!(f, "rollout_event"),
            EntryType::SecurityEvent => write!(f, "security_event"),
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update_release" => Ok(EntryType::UpdateRelease),
            "rollout_event" => Ok(EntryType::RolloutEvent),
            "security_event" => Ok(EntryType::SecurityEvent),
            other => Err(format!("unknown entry type: {other}")),
        }
    }
}

/// One transparency log entry.
///
/// `log_index` is the 0-based append position: never reused, never gapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub data: Value,
    pub log_id: String,
}

impl LogEntry {
    /// Leaf hash of this entry: `SHA256(0x00 ∥ canonical(entry))`.
    pub fn leaf_hash(&self) -> Result<[u8; 32], LogError> {
        Ok(MerkleTree::leaf_hash(&to_canonical_json(self)?))
    }
}

/// Log identity, persisted as `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub log_id: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub tree_size: u64,
}

/// Root pointer, persisted as `merkle-tree.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RootPointer {
    tree_size: u64,
    root_hash: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Public summary of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogInfo {
    pub log_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub tree_size: u64,
    pub root_hash: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// Append-only transparency log backed by a journal and a Merkle tree.
///
/// The journal is the source of truth: an append writes and fsyncs the
/// entry line before the root pointer is replaced, and [`TransparencyLog::open`]
/// rebuilds a lagging pointer from the journal, so the two never disagree
/// after recovery.
#[derive(Debug)]
pub struct TransparencyLog {
    dir: PathBuf,
    config: LogConfig,
    entries: Vec<LogEntry>,
    tree: MerkleTree,
}

impl TransparencyLog {
    /// Open (or create) the log in `dir`, replaying the journal and healing
    /// the root pointer if it lags.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let config = Self::load_or_init_config(&dir)?;
        let entries = Self::load_entries(&dir)?;

        let mut tree = MerkleTree::new();
        for entry in &entries {
            tree.push(entry.leaf_hash()?);
        }

        let mut log = Self {
            dir,
            config,
            entries,
            tree,
        };

        // Heal a pointer (and config) left behind by a crash mid-append.
        let pointer = log.load_pointer()?;
        let stale = pointer.map_or(true, |p| {
            p.tree_size != log.tree.size() || p.root_hash != log.root_hash_hex()
        });
        if stale {
            tracing::warn!(tree_size = log.tree.size(), "rebuilding merkle root pointer from journal");
            log.store_pointer()?;
        }
        if log.config.tree_size != log.tree.size() {
            log.config.tree_size = log.tree.size();
            log.store_config()?;
        }

        Ok(log)
    }

    /// Append an entry and return it.
    ///
    /// The journal line is fsynced before the root pointer is atomically
    /// replaced; a crash between the two is repaired on the next `open`.
    pub fn append(&mut self, entry_type: EntryType, data: Value) -> Result<LogEntry, LogError> {
        let entry = LogEntry {
            log_index: self.tree.size(),
            timestamp: Utc::now(),
            entry_type,
            data,
            log_id: self.config.log_id.clone(),
        };

        let line = to_canonical_json(&entry)?;
        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ENTRIES_FILE))?;
        journal.write_all(&line)?;
        journal.write_all(b"\n")?;
        journal.sync_all()?;

        // The journal line is the canonical form, so it doubles as the leaf
        // preimage.
        self.tree.push(MerkleTree::leaf_hash(&line));
        self.entries.push(entry.clone());

        self.store_pointer()?;
        self.config.tree_size = self.tree.size();
        self.store_config()?;

        tracing::info!(log_index = entry.log_index, entry_type = %entry.entry_type, "transparency log entry appended");
        Ok(entry)
    }

    /// Record an update release.
    pub fn record_update_release(
        &mut self,
        update_id: &str,
        version: u64,
        targets: Value,
        signatures: Value,
    ) -> Result<LogEntry, LogError> {
        let metadata_hash = sha256_hex(&to_canonical_json(&serde_json::json!({
            "update_id": update_id,
            "version": version,
            "targets": targets,
            "signatures": signatures,
        }))?);
        self.append(
            EntryType::UpdateRelease,
            serde_json::json!({
                "update_id": update_id,
                "version": version,
                "targets": targets,
                "signatures": signatures,
                "metadata_hash": metadata_hash,
            }),
        )
    }

    /// Record a rollout event (start, stage change, rollback, complete).
    pub fn record_rollout_event(
        &mut self,
        update_id: &str,
        event_type: &str,
        stage: Option<&str>,
        percentage: Option<u32>,
        health_status: Option<&str>,
    ) -> Result<LogEntry, LogError> {
        self.append(
            EntryType::RolloutEvent,
            serde_json::json!({
                "update_id": update_id,
                "event_type": event_type,
                "stage": stage,
                "percentage": percentage,
                "health_status": health_status,
            }),
        )
    }

    /// Record a security event.
    pub fn record_security_event(
        &mut self,
        event_type: &str,
        severity: &str,
        description: &str,
        affected_systems: &[String],
    ) -> Result<LogEntry, LogError> {
        self.append(
            EntryType::SecurityEvent,
            serde_json::json!({
                "event_type": event_type,
                "severity": severity,
                "description": description,
                "affected_systems": affected_systems,
            }),
        )
    }

    /// Entry at `index`.
    pub fn entry(&self, index: u64) -> Result<&LogEntry, LogError> {
        self.entries
            .get(usize::try_from(index).unwrap_or(usize::MAX))
            .ok_or(LogError::OutOfRange {
                index,
                tree_size: self.tree.size(),
            })
    }

    /// Slice of entries starting at `start`, at most `count`.
    pub fn entries(&self, start: u64, count: usize) -> &[LogEntry] {
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        if start >= self.entries.len() {
            return &[];
        }
        let end = start.saturating_add(count).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Search entries by type and/or `data.update_id`, newest-first order
    /// not guaranteed (journal order), capped at `limit`.
    pub fn search(
        &self,
        entry_type: Option<EntryType>,
        update_id: Option<&str>,
        limit: usize,
    ) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|entry| entry_type.is_none_or(|t| entry.entry_type == t))
            .filter(|entry| {
                update_id.is_none_or(|id| {
                    entry
                        .data
                        .get("update_id")
                        .and_then(Value::as_str)
                        .is_some_and(|entry_id| entry_id == id)
                })
            })
            .take(limit)
            .collect()
    }

    /// Inclusion proof for the entry at `index` against the current root.
    pub fn prove(&self, index: u64) -> Result<InclusionProof, LogError> {
        let proof = self.tree.prove(index).ok_or(LogError::OutOfRange {
            index,
            tree_size: self.tree.size(),
        })?;
        Ok(InclusionProof {
            log_index: index,
            tree_size: self.tree.size(),
            root_hash: self.root_hash_hex().unwrap_or_default(),
            proof,
        })
    }

    /// Verify that the stored entry at `index` is included under the
    /// current root.
    pub fn verify_entry(&self, index: u64) -> Result<bool, LogError> {
        let entry = self.entry(index)?;
        let leaf = entry.leaf_hash()?;
        let proof = self.prove(index)?;
        let Some(root) = self.tree.root() else {
            return Ok(false);
        };
        Ok(MerkleTree::verify_inclusion(&leaf, &proof.proof, &root))
    }

    /// Summary of the log.
    pub fn log_info(&self) -> LogInfo {
        LogInfo {
            log_id: self.config.log_id.clone(),
            description: self.config.description.clone(),
            created_at: self.config.created_at,
            tree_size: self.tree.size(),
            root_hash: self.root_hash_hex(),
            last_update: Utc::now(),
        }
    }

    /// Number of entries.
    pub fn tree_size(&self) -> u64 {
        self.tree.size()
    }

    /// Current root hash, hex-encoded.
    pub fn root_hash_hex(&self) -> Option<String> {
        self.tree.root().map(hex::encode)
    }

    /// The log's identity record.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn load_or_init_config(dir: &Path) -> Result<LogConfig, LogError> {
        let path = dir.join(CONFIG_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = LogConfig {
                    log_id: uuid::Uuid::new_v4().simple().to_string(),
                    created_at: Utc::now(),
                    description: "Citadel update transparency log".to_string(),
                    tree_size: 0,
                };
                write_json_atomic(dir, CONFIG_FILE, &config)?;
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn load_entries(dir: &Path) -> Result<Vec<LogEntry>, LogError> {
        let path = dir.join(ENTRIES_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn load_pointer(&self) -> Result<Option<RootPointer>, LogError> {
        match fs::read(self.dir.join(TREE_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store_pointer(&self) -> Result<(), LogError> {
        write_json_atomic(
            &self.dir,
            TREE_FILE,
            &RootPointer {
                tree_size: self.tree.size(),
                root_hash: self.root_hash_hex(),
                timestamp: Utc::now(),
            },
        )
    }

    fn store_config(&self) -> Result<(), LogError> {
        write_json_atomic(&self.dir, CONFIG_FILE, &self.config)
    }
}

/// Write a JSON document via temp file + fsync + atomic rename.
fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), LogError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_log(dir: &Path) -> TransparencyLog {
        TransparencyLog::open(dir).unwrap()
    }

    #[test]
    fn test_append_monotonic_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());

        for i in 0..5u64 {
            let entry = log
                .append(EntryType::RolloutEvent, json!({"seq": i}))
                .unwrap();
            assert_eq!(entry.log_index, i);
        }
        assert_eq!(log.tree_size(), 5);
    }

    #[test]
    fn test_inclusion_proofs_for_seven_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        for i in 0..7u64 {
            log.append(EntryType::UpdateRelease, json!({"payload": i}))
                .unwrap();
        }

        for i in 0..7u64 {
            assert!(log.verify_entry(i).unwrap(), "entry {i} must verify");
            let proof = log.prove(i).unwrap();
            assert_eq!(proof.tree_size, 7);
        }

        // A substituted entry must fail verification against the real root.
        let tampered = LogEntry {
            data: json!({"payload": "evil"}),
            ..log.entry(3).unwrap().clone()
        };
        let proof = log.prove(3).unwrap();
        let root = log.tree.root().unwrap();
        assert!(!MerkleTree::verify_inclusion(
            &tampered.leaf_hash().unwrap(),
            &proof.proof,
            &root
        ));
    }

    #[test]
    fn test_reopen_restores_log() {
        let dir = tempfile::tempdir().unwrap();
        let root_before;
        {
            let mut log = open_log(dir.path());
            log.record_update_release("U1", 1, json!({}), json!([]))
                .unwrap();
            log.record_security_event("tamper", "critical", "timestamp regression", &[])
                .unwrap();
            root_before = log.root_hash_hex();
        }

        let log = open_log(dir.path());
        assert_eq!(log.tree_size(), 2);
        assert_eq!(log.root_hash_hex(), root_before);
        assert_eq!(log.entry(0).unwrap().entry_type, EntryType::UpdateRelease);
        assert!(log.verify_entry(1).unwrap());
    }

    #[test]
    fn test_pointer_healed_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = open_log(dir.path());
            log.append(EntryType::RolloutEvent, json!({"n": 1})).unwrap();
            log.append(EntryType::RolloutEvent, json!({"n": 2})).unwrap();
        }

        // Simulate a crash that left a stale pointer behind.
        std::fs::write(
            dir.path().join(TREE_FILE),
            r#"{"tree_size":1,"root_hash":"00","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let log = open_log(dir.path());
        assert_eq!(log.tree_size(), 2);
        let pointer: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(TREE_FILE)).unwrap()).unwrap();
        assert_eq!(pointer["tree_size"], 2);
        assert_eq!(
            pointer["root_hash"].as_str().unwrap(),
            log.root_hash_hex().unwrap()
        );
    }

    #[test]
    fn test_search_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.record_update_release("U1", 1, json!({}), json!([]))
            .unwrap();
        log.record_rollout_event("U1", "start", Some("canary"), Some(1), None)
            .unwrap();
        log.record_rollout_event("U2", "start", Some("canary"), Some(1), None)
            .unwrap();
        log.record_security_event("tamper", "critical", "chain break", &[])
            .unwrap();

        assert_eq!(log.search(Some(EntryType::RolloutEvent), None, 100).len(), 2);
        assert_eq!(log.search(None, Some("U1"), 100).len(), 2);
        assert_eq!(
            log.search(Some(EntryType::RolloutEvent), Some("U2"), 100).len(),
            1
        );
        assert_eq!(log.search(None, None, 2).len(), 2);
    }

    #[test]
    fn test_entries_range_and_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        for i in 0..4u64 {
            log.append(EntryType::RolloutEvent, json!({"i": i})).unwrap();
        }

        assert_eq!(log.entries(1, 2).len(), 2);
        assert_eq!(log.entries(3, 10).len(), 1);
        assert!(log.entries(9, 1).is_empty());
        assert!(matches!(
            log.entry(9),
            Err(LogError::OutOfRange { index: 9, tree_size: 4 })
        ));
    }

    #[test]
    fn test_log_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        assert!(log.log_info().root_hash.is_none());

        log.append(EntryType::RolloutEvent, json!({})).unwrap();
        let info = log.log_info();
        assert_eq!(info.tree_size, 1);
        assert!(info.root_hash.is_some());
        assert!(!info.log_id.is_empty());
    }
}
