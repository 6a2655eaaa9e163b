//! End-to-end verification pipeline tests against an in-memory repository.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use citadel_core::digest::{sha256_hex, sha512_hex};
use citadel_core::{to_canonical_json, Algorithm, PublicKey, Role, RoleSpec, Signature};
use citadel_update::{MetadataTransport, RootInit, UpdateClient, UpdateError};
use ed25519_dalek::Signer as _;
use rand::rngs::OsRng;
use serde_json::{json, Value};

/// In-memory update server shared between the test and the client.
#[derive(Clone, Default)]
struct MemoryRepo {
    metadata: Arc<Mutex<HashMap<Role, Vec<u8>>>>,
    targets: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MetadataTransport for MemoryRepo {
    fn fetch_metadata(&self, role: Role) -> Result<Vec<u8>, UpdateError> {
        self.metadata
            .lock()
            .unwrap()
            .get(&role)
            .cloned()
            .ok_or_else(|| UpdateError::Malformed(format!("no {role} metadata published")))
    }

    fn fetch_target(&self, name: &str, sink: &mut dyn Write) -> Result<u64, UpdateError> {
        let bytes = self
            .targets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| UpdateError::UnknownTarget(name.to_string()))?;
        sink.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }
}

/// Signs metadata and publishes a consistent four-document chain.
struct TestPublisher {
    key_id: String,
    signing_key: ed25519_dalek::SigningKey,
    repo: MemoryRepo,
}

impl TestPublisher {
    fn new() -> Self {
        Self {
            key_id: "key-1".to_string(),
            signing_key: ed25519_dalek::SigningKey::generate(&mut OsRng),
            repo: MemoryRepo::default(),
        }
    }

    fn public_key(&self) -> PublicKey {
        PublicKey {
            algorithm: Algorithm::Ed25519,
            value: hex::encode(self.signing_key.verifying_key().to_bytes()),
        }
    }

    fn sign(&self, signed: Value) -> Vec<u8> {
        let message = to_canonical_json(&signed).unwrap();
        let signature = Signature {
            key_id: self.key_id.clone(),
            algorithm: Algorithm::Ed25519,
            value: hex::encode(self.signing_key.sign(&message).to_bytes()),
        };
        serde_json::to_vec(&json!({
            "signed": signed,
            "signatures": [signature],
        }))
        .unwrap()
    }

    fn root_document(&self, version: u64, key: &PublicKey, key_id: &str) -> Vec<u8> {
        let role = RoleSpec {
            key_ids: vec![key_id.to_string()],
            threshold: 1,
        };
        let mut roles = BTreeMap::new();
        for name in ["root", "timestamp", "snapshot", "targets"] {
            roles.insert(name.to_string(), role.clone());
        }
        self.sign(json!({
            "version": version,
            "expires": (Utc::now() + Duration::days(365)).to_rfc3339(),
            "keys": { key_id: key },
            "roles": roles,
        }))
    }

    fn root(&self, version: u64) -> Vec<u8> {
        self.root_document(version, &self.public_key(), &self.key_id)
    }

    /// Publish a full metadata chain at `version` declaring `targets`.
    fn publish(&self, version: u64, targets: &[(&str, &[u8])]) {
        self.publish_with_expiry(version, targets, Utc::now() + Duration::days(7));
    }

    fn publish_with_expiry(
        &self,
        version: u64,
        targets: &[(&str, &[u8])],
        expires: chrono::DateTime<Utc>,
    ) {
        let expires = expires.to_rfc3339();

        let mut target_map = serde_json::Map::new();
        for (name, bytes) in targets {
            self.repo
                .targets
                .lock()
                .unwrap()
                .insert(name.to_string(), bytes.to_vec());
            target_map.insert(
                name.to_string(),
                json!({
                    "length": bytes.len(),
                    "hashes": {
                        "sha256": sha256_hex(bytes),
                        "sha512": sha512_hex(bytes),
                    },
                    "custom": {"created_at": "2026-07-01T00:00:00Z"},
                }),
            );
        }

        let targets_raw = self.sign(json!({
            "version": version,
            "expires": expires,
            "targets": target_map,
        }));

        let snapshot_raw = self.sign(json!({
            "version": version,
            "expires": expires,
            "meta": {
                "targets.json": {
                    "version": version,
                    "length": targets_raw.len(),
                    "hashes": {"sha256": sha256_hex(&targets_raw)},
                }
            },
        }));

        let timestamp_raw = self.sign(json!({
            "version": version,
            "expires": expires,
            "snapshot": {
                "version": version,
                "length": snapshot_raw.len(),
                "hashes": {"sha256": sha256_hex(&snapshot_raw)},
            },
        }));

        let mut metadata = self.repo.metadata.lock().unwrap();
        metadata.insert(Role::Targets, targets_raw);
        metadata.insert(Role::Snapshot, snapshot_raw);
        metadata.insert(Role::Timestamp, timestamp_raw);
    }

    fn client(&self, cache_dir: &std::path::Path) -> UpdateClient<MemoryRepo> {
        let mut client = UpdateClient::open(self.repo.clone(), cache_dir).unwrap();
        client
            .initialize_root(&self.root(1), RootInit::Bootstrap)
            .unwrap();
        client
    }
}

#[test]
fn test_happy_path_update() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[("pkg-1.0.bin", b"hello world!")]);

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    let listed = client.available_targets().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed["pkg-1.0.bin"].length, 12);

    let dest = dir.path().join("staging/pkg-1.0.bin");
    client.fetch_target("pkg-1.0.bin", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello world!");
}

#[test]
fn test_tampered_target_rejected() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[("pkg-1.0.bin", b"hello world!")]);
    // Serve different bytes than the targets metadata declares.
    publisher
        .repo
        .targets
        .lock()
        .unwrap()
        .insert("pkg-1.0.bin".to_string(), b"hELLo world!".to_vec());

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    let dest = dir.path().join("staging/pkg-1.0.bin");
    let err = client.fetch_target("pkg-1.0.bin", &dest).unwrap_err();
    assert!(matches!(err, UpdateError::HashMismatch { .. }));
    assert!(!dest.exists());
}

#[test]
fn test_truncated_target_rejected() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[("pkg-1.0.bin", b"hello world!")]);
    publisher
        .repo
        .targets
        .lock()
        .unwrap()
        .insert("pkg-1.0.bin".to_string(), b"hello".to_vec());

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    let dest = dir.path().join("pkg-1.0.bin");
    let err = client.fetch_target("pkg-1.0.bin", &dest).unwrap_err();
    assert!(matches!(err, UpdateError::LengthMismatch { .. }));
    assert!(!dest.exists());
}

#[test]
fn test_timestamp_version_regression_rejected() {
    let publisher = TestPublisher::new();
    publisher.publish(5, &[]);

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    publisher.publish(4, &[]);
    let err = client.refresh_metadata().unwrap_err();
    assert!(matches!(
        err,
        UpdateError::VersionRegression { current: 5, received: 4, .. }
    ));

    // The floor persists across client restarts via the cache.
    let mut restarted = UpdateClient::open(publisher.repo.clone(), dir.path().join("metadata")).unwrap();
    let err = restarted.refresh_metadata().unwrap_err();
    assert!(matches!(err, UpdateError::VersionRegression { .. }));
}

#[test]
fn test_expired_timestamp_rejected_and_cache_kept() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[("pkg-1.0.bin", b"hello world!")]);

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    publisher.publish_with_expiry(2, &[], Utc::now() - Duration::hours(1));
    let err = client.refresh_metadata().unwrap_err();
    assert!(matches!(err, UpdateError::ExpiredMetadata { .. }));

    // The previous verified targets are still usable in this process.
    assert!(client.available_targets().unwrap().contains_key("pkg-1.0.bin"));
}

#[test]
fn test_root_self_upgrade() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[]);

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));

    // Sequential upgrade is accepted.
    client
        .initialize_root(&publisher.root(2), RootInit::SelfUpgrade)
        .unwrap();
    assert_eq!(client.trusted_root().unwrap().version, 2);

    // Version skipping is rejected.
    let err = client
        .initialize_root(&publisher.root(4), RootInit::SelfUpgrade)
        .unwrap_err();
    assert!(matches!(err, UpdateError::VersionRegression { .. }));

    // Downgrade is rejected.
    let err = client
        .initialize_root(&publisher.root(2), RootInit::SelfUpgrade)
        .unwrap_err();
    assert!(matches!(err, UpdateError::VersionRegression { .. }));
}

#[test]
fn test_root_self_upgrade_requires_old_root_signature() {
    let publisher = TestPublisher::new();
    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));

    // A root signed only by a brand-new key must not be accepted, even
    // though it is self-consistent.
    let usurper = TestPublisher::new();
    let foreign_root = usurper.root_document(2, &usurper.public_key(), &usurper.key_id);
    let err = client
        .initialize_root(&foreign_root, RootInit::SelfUpgrade)
        .unwrap_err();
    assert!(matches!(err, UpdateError::Verify(_)));
}

#[test]
fn test_fetch_requires_refresh() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[("pkg-1.0.bin", b"hello world!")]);

    let dir = tempfile::tempdir().unwrap();
    let client = publisher.client(&dir.path().join("metadata"));
    let err = client
        .fetch_target("pkg-1.0.bin", &dir.path().join("out.bin"))
        .unwrap_err();
    assert!(matches!(err, UpdateError::NotInitialized(_)));
}

#[test]
fn test_unknown_target() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[]);

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    client.refresh_metadata().unwrap();

    let err = client
        .fetch_target("nope.bin", &dir.path().join("nope.bin"))
        .unwrap_err();
    assert!(matches!(err, UpdateError::UnknownTarget(_)));
}

#[test]
fn test_snapshot_reference_mismatch_rejected() {
    let publisher = TestPublisher::new();
    publisher.publish(1, &[]);

    // Corrupt the published snapshot after the timestamp pinned it.
    {
        let mut metadata = publisher.repo.metadata.lock().unwrap();
        let snapshot = metadata.get_mut(&Role::Snapshot).unwrap();
        snapshot.push(b' ');
    }

    let dir = tempfile::tempdir().unwrap();
    let mut client = publisher.client(&dir.path().join("metadata"));
    let err = client.refresh_metadata().unwrap_err();
    assert!(matches!(err, UpdateError::LengthMismatch { .. }));
}
