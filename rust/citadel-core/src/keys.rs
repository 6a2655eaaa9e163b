//! Roles, algorithms, and public key material.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a public key in a key table (hex-encoded fingerprint).
pub type KeyId = String;

/// The four top-level signing roles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Trust anchor: defines keys and thresholds for all roles.
    Root,
    /// Freshness: references the current snapshot, prevents rollback.
    Timestamp,
    /// Consistency: records versions of all metadata files.
    Snapshot,
    /// Integrity: maps artifact names to hashes and sizes.
    Targets,
}

impl Role {
    /// Metadata file name for this role on the server and in the cache.
    pub fn metadata_file(&self) -> &'static str {
        match self {
            Role::Root => "root.json",
            Role::Timestamp => "timestamp.json",
            Role::Snapshot => "snapshot.json",
            Role::Targets => "targets.json",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Root => write!(f, "root"),
            Role::Timestamp => write!(f, "timestamp"),
            Role::Snapshot => write!(f, "snapshot"),
            Role::Targets => write!(f, "targets"),
        }
    }
}

/// Supported signature algorithms.
///
/// Unknown algorithm strings fail envelope deserialization, so an envelope
/// carrying one is rejected before any cryptography runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Algorithm {
    /// Ed25519 over a raw 32-byte public key (hex-encoded in the key table).
    #[serde(rename = "ed25519")]
    Ed25519,
    /// RSA-PSS with SHA-256, MGF1-SHA256, maximum salt length. Public keys
    /// are PEM-encoded SPKI.
    #[serde(rename = "rsa-pss-sha256-mgf1-sha256-saltmax")]
    RsaPssSha256,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Ed25519 => write!(f, "ed25519"),
            Algorithm::RsaPssSha256 => write!(f, "rsa-pss-sha256-mgf1-sha256-saltmax"),
        }
    }
}

/// A public key with its verification algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Algorithm the key verifies under.
    pub algorithm: Algorithm,
    /// Key material: hex raw bytes for Ed25519, PEM SPKI for RSA.
    pub value: String,
}

/// Key set and signature threshold assigned to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Key IDs authorized for this role.
    pub key_ids: Vec<KeyId>,
    /// Minimum number of distinct valid signatures required.
    pub threshold: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Timestamp).unwrap(), r#""timestamp""#);
        let role: Role = serde_json::from_str(r#""targets""#).unwrap();
        assert_eq!(role, Role::Targets);
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!(serde_json::to_string(&Algorithm::Ed25519).unwrap(), r#""ed25519""#);
        assert_eq!(
            serde_json::to_string(&Algorithm::RsaPssSha256).unwrap(),
            r#""rsa-pss-sha256-mgf1-sha256-saltmax""#
        );
        assert!(serde_json::from_str::<Algorithm>(r#""dsa""#).is_err());
    }

    #[test]
    fn test_role_metadata_file() {
        assert_eq!(Role::Root.metadata_file(), "root.json");
        assert_eq!(Role::Snapshot.metadata_file(), "snapshot.json");
    }
}
