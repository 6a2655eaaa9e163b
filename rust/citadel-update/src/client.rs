//! The update client: trusted state, metadata refresh, and verified
//! target downloads.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use citadel_core::digest::sha256_hex;
use citadel_core::{Role, SignedEnvelope, VerifierRegistry};
use sha2::{Digest, Sha256, Sha512};

use crate::cache::MetadataCache;
use crate::error::UpdateError;
use crate::metadata::{
    MetaRef, RoleMetadata, RootMetadata, SnapshotMetadata, TargetSpec, TargetsMetadata,
    TimestampMetadata,
};
use crate::transport::MetadataTransport;

/// How a candidate root document is to be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootInit {
    /// Out-of-band trust anchor: the root must be self-valid and is
    /// accepted on the caller's authority.
    Bootstrap,
    /// Rotation: the candidate must verify under both the current trusted
    /// root and its own embedded key set, with `version == current + 1`.
    SelfUpgrade,
}

/// A verified metadata document: raw bytes, envelope, and typed view.
#[derive(Debug, Clone)]
struct VerifiedMeta<M> {
    raw: Vec<u8>,
    parsed: M,
}

/// The currently trusted root and its raw envelope.
#[derive(Debug, Clone)]
struct TrustedRoot {
    raw: Vec<u8>,
    metadata: RootMetadata,
}

/// Update client holding the trusted root and the verified metadata set.
///
/// All verification failures abort the running operation and leave both the
/// in-memory state and the on-disk cache untouched.
pub struct UpdateClient<T: MetadataTransport> {
    transport: T,
    cache: MetadataCache,
    registry: VerifierRegistry,
    trusted_root: Option<TrustedRoot>,
    timestamp: Option<VerifiedMeta<TimestampMetadata>>,
    snapshot: Option<VerifiedMeta<SnapshotMetadata>>,
    targets: Option<VerifiedMeta<TargetsMetadata>>,
    /// Targets were refreshed by this process; gate for `fetch_target`.
    refreshed: bool,
}

impl<T: MetadataTransport> UpdateClient<T> {
    /// Open a client, restoring previously verified metadata from the cache.
    ///
    /// Cached documents are re-verified against the cached root; they
    /// restore the anti-rollback version floors but do not count as fresh.
    pub fn open(transport: T, cache_dir: impl Into<std::path::PathBuf>) -> Result<Self, UpdateError> {
        let mut client = Self {
            transport,
            cache: MetadataCache::new(cache_dir),
            registry: VerifierRegistry::default(),
            trusted_root: None,
            timestamp: None,
            snapshot: None,
            targets: None,
            refreshed: false,
        };

        if let Some(root_raw) = client.cache.load(Role::Root)? {
            client.accept_root(&root_raw, RootInit::Bootstrap)?;
            client.timestamp = client.load_cached::<TimestampMetadata>()?;
            client.snapshot = client.load_cached::<SnapshotMetadata>()?;
            client.targets = client.load_cached::<TargetsMetadata>()?;
        }

        Ok(client)
    }

    /// Establish or rotate root trust from a raw root envelope.
    pub fn initialize_root(&mut self, bytes: &[u8], mode: RootInit) -> Result<(), UpdateError> {
        self.accept_root(bytes, mode)?;
        self.cache.store(Role::Root, bytes)?;
        Ok(())
    }

    fn accept_root(&mut self, bytes: &[u8], mode: RootInit) -> Result<(), UpdateError> {
        let envelope: SignedEnvelope =
            serde_json::from_slice(bytes).map_err(UpdateError::malformed)?;
        let candidate: RootMetadata = envelope.parse_signed().map_err(UpdateError::malformed)?;

        // The root is always checked against its own embedded key set.
        let own_role = candidate.role(Role::Root)?;
        self.registry
            .verify_envelope(&envelope, &candidate.keys, own_role)?;

        if mode == RootInit::SelfUpgrade {
            let current = self
                .trusted_root
                .as_ref()
                .ok_or(UpdateError::NotInitialized("root trust"))?;
            let current_role = current.metadata.role(Role::Root)?;
            self.registry
                .verify_envelope(&envelope, &current.metadata.keys, current_role)?;

            // Strictly sequential versions: no skipping, no downgrade.
            if candidate.version != current.metadata.version + 1 {
                return Err(UpdateError::VersionRegression {
                    scope: "root".to_string(),
                    current: current.metadata.version,
                    received: candidate.version,
                });
            }
        }

        tracing::info!(version = candidate.version, keys = candidate.keys.len(), "root trust updated");
        self.trusted_root = Some(TrustedRoot {
            raw: bytes.to_vec(),
            metadata: candidate,
        });
        Ok(())
    }

    /// Refresh timestamp, snapshot, and targets metadata in order.
    ///
    /// Each step verifies role signatures, expiry, version monotonicity, and
    /// the referential hash/length pinned by the previous step. The cache is
    /// updated only after the whole chain verifies.
    pub fn refresh_metadata(&mut self) -> Result<(), UpdateError> {
        let now = Utc::now();

        // 1. Timestamp: entry point, always fetched.
        let raw = self.transport.fetch_metadata(Role::Timestamp)?;
        let timestamp = self.verify_metadata::<TimestampMetadata>(&raw, now)?;
        ensure_version_floor("timestamp", self.timestamp.as_ref(), timestamp.parsed.version)?;

        // 2. Snapshot, keyed by the timestamp's reference.
        let snapshot_ref = timestamp.parsed.snapshot.clone();
        let snapshot = match &self.snapshot {
            Some(cached) if reference_matches(&snapshot_ref, &cached.raw) => cached.clone(),
            _ => {
                let raw = self.transport.fetch_metadata(Role::Snapshot)?;
                check_reference("snapshot.json", &snapshot_ref, &raw)?;
                let snapshot = self.verify_metadata::<SnapshotMetadata>(&raw, now)?;
                ensure_version_floor("snapshot", self.snapshot.as_ref(), snapshot.parsed.version)?;
                if let Some(cached) = &self.snapshot {
                    // Per-file version floors across snapshot updates.
                    for (name, previous) in &cached.parsed.meta {
                        if let Some(current) = snapshot.parsed.meta.get(name) {
                            if current.version < previous.version {
                                return Err(UpdateError::VersionRegression {
                                    scope: format!("snapshot meta {name}"),
                                    current: previous.version,
                                    received: current.version,
                                });
                            }
                        }
                    }
                }
                snapshot
            }
        };

        // 3. Targets, keyed by the snapshot's reference.
        let targets_ref = snapshot.parsed.targets_ref()?.clone();
        let targets = match &self.targets {
            Some(cached) if reference_matches(&targets_ref, &cached.raw) => cached.clone(),
            _ => {
                let raw = self.transport.fetch_metadata(Role::Targets)?;
                check_reference("targets.json", &targets_ref, &raw)?;
                let targets = self.verify_metadata::<TargetsMetadata>(&raw, now)?;
                ensure_version_floor("targets", self.targets.as_ref(), targets.parsed.version)?;
                targets
            }
        };

        // Reused cached documents must still be fresh for this refresh.
        ensure_fresh(Role::Snapshot, snapshot.parsed.expires, now)?;
        ensure_fresh(Role::Targets, targets.parsed.expires, now)?;

        // 4. Commit: persist, then replace in-memory state.
        self.cache.store(Role::Timestamp, &timestamp.raw)?;
        self.cache.store(Role::Snapshot, &snapshot.raw)?;
        self.cache.store(Role::Targets, &targets.raw)?;
        self.timestamp = Some(timestamp);
        self.snapshot = Some(snapshot);
        self.targets = Some(targets);
        self.refreshed = true;

        tracing::info!("metadata refreshed and verified");
        Ok(())
    }

    /// Download, verify, and atomically install a target artifact at `dest`.
    ///
    /// The artifact is streamed into a temporary file in the destination
    /// directory while length, SHA-256, and SHA-512 are computed
    /// incrementally; nothing appears at `dest` unless every check passes.
    pub fn fetch_target(&self, name: &str, dest: &Path) -> Result<(), UpdateError> {
        let targets = self.fresh_targets()?;
        let spec = targets
            .targets
            .get(name)
            .ok_or_else(|| UpdateError::UnknownTarget(name.to_string()))?;

        let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };

        let mut sink = DigestWriter::new(tmp.as_file_mut());
        self.transport.fetch_target(name, &mut sink)?;
        let (length, sha256, sha512) = sink.finish();

        // The temp file is removed on every error path when `tmp` drops.
        verify_target(name, spec, length, &sha256, &sha512)?;

        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|err| err.error)?;
        tracing::info!(target = name, bytes = length, path = %dest.display(), "target installed");
        Ok(())
    }

    /// The verified target catalog. Requires a refresh in this process.
    pub fn available_targets(&self) -> Result<&BTreeMap<String, TargetSpec>, UpdateError> {
        Ok(&self.fresh_targets()?.targets)
    }

    /// The currently trusted root metadata, if initialized.
    pub fn trusted_root(&self) -> Option<&RootMetadata> {
        self.trusted_root.as_ref().map(|root| &root.metadata)
    }

    fn fresh_targets(&self) -> Result<&TargetsMetadata, UpdateError> {
        if !self.refreshed {
            return Err(UpdateError::NotInitialized(
                "targets metadata not refreshed; call refresh_metadata first",
            ));
        }
        self.targets
            .as_ref()
            .map(|targets| &targets.parsed)
            .ok_or(UpdateError::NotInitialized("targets metadata"))
    }

    /// Parse and verify a metadata document under its role's keys.
    fn verify_metadata<M: RoleMetadata>(
        &self,
        raw: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerifiedMeta<M>, UpdateError> {
        let root = self
            .trusted_root
            .as_ref()
            .ok_or(UpdateError::NotInitialized("root trust"))?;
        let envelope: SignedEnvelope =
            serde_json::from_slice(raw).map_err(UpdateError::malformed)?;
        let role_spec = root.metadata.role(M::ROLE)?;
        self.registry
            .verify_envelope(&envelope, &root.metadata.keys, role_spec)?;
        let parsed: M = envelope.parse_signed().map_err(UpdateError::malformed)?;
        if parsed.expires() < now {
            return Err(UpdateError::ExpiredMetadata {
                role: M::ROLE,
                expires: parsed.expires(),
            });
        }
        Ok(VerifiedMeta {
            raw: raw.to_vec(),
            parsed,
        })
    }

    /// Reload one cached role document, re-verifying it under the root.
    fn load_cached<M: RoleMetadata>(&self) -> Result<Option<VerifiedMeta<M>>, UpdateError> {
        let Some(raw) = self.cache.load(M::ROLE)? else {
            return Ok(None);
        };
        // Expiry is intentionally not enforced here: stale cached metadata
        // still provides the version floor, and a refresh replaces it.
        let root = self
            .trusted_root
            .as_ref()
            .ok_or(UpdateError::NotInitialized("root trust"))?;
        let envelope: SignedEnvelope =
            serde_json::from_slice(&raw).map_err(UpdateError::malformed)?;
        let role_spec = root.metadata.role(M::ROLE)?;
        self.registry
            .verify_envelope(&envelope, &root.metadata.keys, role_spec)?;
        let parsed: M = envelope.parse_signed().map_err(UpdateError::malformed)?;
        Ok(Some(VerifiedMeta { raw, parsed }))
    }
}

/// Reject metadata past its expiration.
fn ensure_fresh(role: Role, expires: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), UpdateError> {
    if expires < now {
        return Err(UpdateError::ExpiredMetadata { role, expires });
    }
    Ok(())
}

/// Reject `received` versions below the cached floor.
fn ensure_version_floor<M>(
    scope: &str,
    cached: Option<&VerifiedMeta<M>>,
    received: u64,
) -> Result<(), UpdateError>
where
    M: RoleMetadata,
{
    if let Some(cached) = cached {
        let current = cached.parsed.version();
        if received < current {
            return Err(UpdateError::VersionRegression {
                scope: scope.to_string(),
                current,
                received,
            });
        }
    }
    Ok(())
}

/// Does `raw` already satisfy the reference? Used to skip refetching.
fn reference_matches(reference: &MetaRef, raw: &[u8]) -> bool {
    raw.len() as u64 == reference.length && sha256_hex(raw) == reference.hashes.sha256
}

/// Verify fetched metadata bytes against the reference that pinned them.
fn check_reference(name: &str, reference: &MetaRef, raw: &[u8]) -> Result<(), UpdateError> {
    if raw.len() as u64 != reference.length {
        return Err(UpdateError::LengthMismatch {
            name: name.to_string(),
            expected: reference.length,
            actual: raw.len() as u64,
        });
    }
    let actual = sha256_hex(raw);
    if actual != reference.hashes.sha256 {
        return Err(UpdateError::HashMismatch {
            name: name.to_string(),
            algorithm: "sha256",
            expected: reference.hashes.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

/// Compare a downloaded artifact against its targets entry.
fn verify_target(
    name: &str,
    spec: &TargetSpec,
    length: u64,
    sha256: &str,
    sha512: &str,
) -> Result<(), UpdateError> {
    if length != spec.length {
        return Err(UpdateError::LengthMismatch {
            name: name.to_string(),
            expected: spec.length,
            actual: length,
        });
    }
    if sha256 != spec.hashes.sha256 {
        return Err(UpdateError::HashMismatch {
            name: name.to_string(),
            algorithm: "sha256",
            expected: spec.hashes.sha256.clone(),
            actual: sha256.to_string(),
        });
    }
    if sha512 != spec.hashes.sha512 {
        return Err(UpdateError::HashMismatch {
            name: name.to_string(),
            algorithm: "sha512",
            expected: spec.hashes.sha512.clone(),
            actual: sha512.to_string(),
        });
    }
    Ok(())
}

/// Writer that tees into SHA-256/SHA-512 and counts bytes.
struct DigestWriter<W: Write> {
    inner: W,
    sha256: Sha256,
    sha512: Sha512,
    length: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            sha256: Sha256::new(),
            sha512: Sha512::new(),
            length: 0,
        }
    }

    fn finish(self) -> (u64, String, String) {
        (
            self.length,
            hex::encode(self.sha256.finalize()),
            hex::encode(self.sha512.finalize()),
        )
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.sha256.update(&buf[..written]);
        self.sha512.update(&buf[..written]);
        self.length += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
