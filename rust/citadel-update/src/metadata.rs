//! Typed views of the four metadata roles.
//!
//! Every signed document carries a monotonically non-decreasing `version`
//! and an `expires` timestamp; the role-specific payload hangs off those.
//! Documents travel inside a [`citadel_core::SignedEnvelope`]; the raw JSON
//! is retained alongside the typed view so canonical bytes can always be
//! recomputed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use citadel_core::{KeyId, PublicKey, Role, RoleSpec};
use serde::{Deserialize, Serialize};

/// Hashes pinned for a referenced metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHashes {
    /// Hex-encoded SHA-256 of the referenced file's raw bytes.
    pub sha256: String,
}

/// Reference to another metadata file by version, length, and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRef {
    pub version: u64,
    pub length: u64,
    pub hashes: MetaHashes,
}

/// Hashes pinned for a target artifact. Both digests are required; an entry
/// missing either is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHashes {
    pub sha256: String,
    pub sha512: String,
}

/// Description of a single target artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Size in bytes.
    pub length: u64,
    /// Required digests of the artifact content.
    pub hashes: TargetHashes,
    /// Free-form publisher metadata (e.g. `created_at`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// Root metadata: the trust anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// All known public keys, indexed by key ID.
    pub keys: BTreeMap<KeyId, PublicKey>,
    /// Role definitions with key IDs and thresholds.
    pub roles: BTreeMap<Role, RoleSpec>,
}

impl RootMetadata {
    /// Role definition for `role`, or a malformed-metadata error.
    pub fn role(&self, role: Role) -> Result<&RoleSpec, crate::UpdateError> {
        self.roles
            .get(&role)
            .ok_or_else(|| crate::UpdateError::Malformed(format!("root defines no {role} role")))
    }
}

/// Timestamp metadata: entry point of every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Reference to the current snapshot file.
    pub snapshot: MetaRef,
}

/// Snapshot metadata: versions and hashes of all other metadata files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Map of metadata file name to its reference.
    pub meta: BTreeMap<String, MetaRef>,
}

impl SnapshotMetadata {
    /// Reference to the targets metadata file.
    pub fn targets_ref(&self) -> Result<&MetaRef, crate::UpdateError> {
        self.meta.get(Role::Targets.metadata_file()).ok_or_else(|| {
            crate::UpdateError::Malformed("snapshot does not reference targets.json".to_string())
        })
    }
}

/// Targets metadata: the artifact catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsMetadata {
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Map of target name to its length and hashes.
    pub targets: BTreeMap<String, TargetSpec>,
}

/// Common accessors used by the generic verification path.
pub trait RoleMetadata: serde::de::DeserializeOwned {
    /// The role whose keys sign this document.
    const ROLE: Role;
    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;
}

impl RoleMetadata for RootMetadata {
    const ROLE: Role = Role::Root;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl RoleMetadata for TimestampMetadata {
    const ROLE: Role = Role::Timestamp;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl RoleMetadata for SnapshotMetadata {
    const ROLE: Role = Role::Snapshot;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl RoleMetadata for TargetsMetadata {
    const ROLE: Role = Role::Targets;
    fn version(&self) -> u64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}
