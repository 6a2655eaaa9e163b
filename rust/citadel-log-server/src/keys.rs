//! Per-client verification keys.
//!
//! Each client that uploads batches has an RSA-PSS-SHA256 public key
//! installed as `<client_keys_dir>/<client_id>.pub` (PEM SPKI). Keys are
//! loaded once at startup; a client without a key cannot authenticate a
//! batch.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use citadel_core::{Algorithm, PublicKey, VerifierRegistry};

use crate::error::ServerError;

/// Verification keys indexed by client ID.
#[derive(Debug)]
pub struct ClientKeys {
    keys: BTreeMap<String, PublicKey>,
    registry: VerifierRegistry,
}

impl ClientKeys {
    /// Load every `*.pub` file in `dir`. A missing directory yields an
    /// empty key set; individual unreadable files are skipped with a log
    /// line.
    pub fn load(dir: &Path) -> Result<Self, ServerError> {
        let mut keys = BTreeMap::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "client key directory missing");
                return Ok(Self {
                    keys,
                    registry: VerifierRegistry::default(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pub") {
                continue;
            }
            let Some(client_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(pem) => {
                    keys.insert(
                        client_id.to_string(),
                        PublicKey {
                            algorithm: Algorithm::RsaPssSha256,
                            value: pem,
                        },
                    );
                    tracing::info!(client_id, "loaded client verification key");
                }
                Err(err) => {
                    tracing::error!(client_id, %err, "failed to read client key");
                }
            }
        }

        Ok(Self {
            keys,
            registry: VerifierRegistry::default(),
        })
    }

    /// Verify a detached batch signature for `client_id`.
    ///
    /// Returns `false` for unknown clients, malformed keys, and bad
    /// signatures alike; the caller maps all of these to `bad_signature`.
    pub fn verify_batch(&self, client_id: &str, batch: &[u8], signature: &[u8]) -> bool {
        let Some(key) = self.keys.get(client_id) else {
            tracing::error!(client_id, "no verification key installed");
            return false;
        };
        match self.registry.verify_raw(key, batch, signature) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(client_id, %err, "batch signature rejected");
                false
            }
        }
    }

    /// Number of installed keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are installed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use sha2::Sha256;

    fn install_key(dir: &Path, client_id: &str) -> rsa::pss::SigningKey<Sha256> {
        let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = private.to_public_key();
        let pem = public.to_public_key_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        fs::write(dir.join(format!("{client_id}.pub")), pem).unwrap();
        let salt_len = citadel_core::verify::max_salt_len::<Sha256>(&public);
        rsa::pss::SigningKey::<Sha256>::new_with_salt_len(private, salt_len)
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let keys = ClientKeys::load(&dir.path().join("absent")).unwrap();
        assert!(keys.is_empty());
        assert!(!keys.verify_batch("anyone", b"data", &[0u8; 256]));
    }

    #[test]
    fn test_signature_verification_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let signing_key = install_key(dir.path(), "node-a");
        let keys = ClientKeys::load(dir.path()).unwrap();
        assert_eq!(keys.len(), 1);

        let batch = b"log batch contents";
        let signature = signing_key.sign_with_rng(&mut OsRng, batch).to_vec();

        assert!(keys.verify_batch("node-a", batch, &signature));
        assert!(!keys.verify_batch("node-a", b"tampered", &signature));
        assert!(!keys.verify_batch("node-b", batch, &signature));
    }

    #[test]
    fn test_non_pub_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "not a key").unwrap();
        install_key(dir.path(), "node-a");
        let keys = ClientKeys::load(dir.path()).unwrap();
        assert_eq!(keys.len(), 1);
    }
}
