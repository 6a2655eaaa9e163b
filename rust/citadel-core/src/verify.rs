//! Threshold signature verification over signed envelopes.
//!
//! An envelope pairs an arbitrary `signed` record with a list of signatures.
//! A signature is valid iff the public key identified by its `key_id`
//! verifies the signature bytes over the canonical JSON of `signed`. An
//! envelope is role-valid iff at least `threshold` *distinct* key IDs from
//! the role's key set produce valid signatures.
//!
//! Verification is dispatched through the [`SignatureVerifier`] capability
//! interface; the Ed25519 and RSA-PSS implementations are registered when
//! the [`VerifierRegistry`] is constructed.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::Verifier as _;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::canonical::{to_canonical_json, CanonicalError};
use crate::keys::{Algorithm, KeyId, PublicKey, RoleSpec};

/// Errors produced by signature verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// No verifier is registered for the key's algorithm.
    #[error("unknown signature algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The public key material could not be decoded.
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// The signature does not verify over the canonical message.
    #[error("invalid signature")]
    InvalidSignature,

    /// Fewer distinct valid signatures than the role requires.
    #[error("signature threshold not met: need {required}, got {valid}")]
    ThresholdNotMet { required: u32, valid: u32 },

    /// The signed record could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// A detached signature over the canonical form of a signed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Key ID that produced this signature.
    pub key_id: KeyId,
    /// Algorithm the signer claims; verification uses the algorithm declared
    /// by the key table entry.
    pub algorithm: Algorithm,
    /// Signature bytes, hex-encoded.
    #[serde(rename = "signature")]
    pub value: String,
}

/// A signed record together with its signatures.
///
/// `signed` is kept as a raw JSON value so the exact bytes that were signed
/// can be recomputed regardless of which typed view the caller parses it
/// into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// The record being attested.
    pub signed: serde_json::Value,
    /// Detached signatures over `canonical(signed)`.
    pub signatures: Vec<Signature>,
}

impl SignedEnvelope {
    /// Canonical bytes of the signed portion.
    pub fn canonical_signed(&self) -> Result<Vec<u8>, CanonicalError> {
        to_canonical_json(&self.signed)
    }

    /// Parse the signed portion into a typed view.
    pub fn parse_signed<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.signed.clone())
    }
}

/// Verifies a raw signature for one algorithm.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `message` with `key`.
    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8])
        -> Result<(), VerifyError>;
}

/// Ed25519 over raw 32-byte public keys.
struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        key: &PublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let raw = hex::decode(&key.value)
            .map_err(|e| VerifyError::MalformedKey(format!("ed25519 key not hex: {e}")))?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| VerifyError::MalformedKey("ed25519 key must be 32 bytes".into()))?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map_err(|e| VerifyError::MalformedKey(format!("ed25519 key rejected: {e}")))?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| VerifyError::InvalidSignature)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| VerifyError::InvalidSignature)
    }
}

/// RSA-PSS-SHA256 over PEM SPKI public keys.
///
/// The salt length is pinned to the maximum the modulus allows
/// (`k - hLen - 2`), matching signers that use `MAX_LENGTH` salts.
struct RsaPssVerifier;

impl SignatureVerifier for RsaPssVerifier {
    fn verify(
        &self,
        key: &PublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let public = rsa::RsaPublicKey::from_public_key_pem(&key.value)
            .map_err(|e| VerifyError::MalformedKey(format!("rsa key rejected: {e}")))?;
        let salt_len = max_salt_len::<Sha256>(&public);
        let verifying_key = rsa::pss::VerifyingKey::<Sha256>::new_with_salt_len(public, salt_len);
        let signature = rsa::pss::Signature::try_from(signature)
            .map_err(|_| VerifyError::InvalidSignature)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| VerifyError::InvalidSignature)
    }
}

/// Maximum PSS salt length for a key: modulus bytes minus digest and the
/// two framing bytes.
pub fn max_salt_len<D: sha2::Digest>(key: &rsa::RsaPublicKey) -> usize {
    key.size().saturating_sub(<D as sha2::Digest>::output_size() + 2)
}

/// Algorithm-indexed set of signature verifiers.
pub struct VerifierRegistry {
    verifiers: BTreeMap<Algorithm, Box<dyn SignatureVerifier>>,
}

impl Default for VerifierRegistry {
    fn default() -> Self {
        let mut verifiers: BTreeMap<Algorithm, Box<dyn SignatureVerifier>> = BTreeMap::new();
        verifiers.insert(Algorithm::Ed25519, Box::new(Ed25519Verifier));
        verifiers.insert(Algorithm::RsaPssSha256, Box::new(RsaPssVerifier));
        Self { verifiers }
    }
}

impl std::fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("algorithms", &self.verifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VerifierRegistry {
    /// Verify a raw signature with the verifier registered for the key's
    /// algorithm.
    pub fn verify_raw(
        &self,
        key: &PublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let verifier = self
            .verifiers
            .get(&key.algorithm)
            .ok_or_else(|| VerifyError::UnknownAlgorithm(key.algorithm.to_string()))?;
        verifier.verify(key, message, signature)
    }

    /// Verify that `envelope` meets the signature threshold of `role` under
    /// `keys`.
    ///
    /// Signatures referencing key IDs outside the role are skipped, and
    /// duplicate key IDs count once. An envelope carrying fewer signatures
    /// than the threshold is rejected before any cryptography runs.
    pub fn verify_envelope(
        &self,
        envelope: &SignedEnvelope,
        keys: &BTreeMap<KeyId, PublicKey>,
        role: &RoleSpec,
    ) -> Result<(), VerifyError> {
        if (envelope.signatures.len() as u32) < role.threshold {
            return Err(VerifyError::ThresholdNotMet {
                required: role.threshold,
                valid: 0,
            });
        }

        let message = envelope.canonical_signed()?;
        let mut verified: BTreeSet<&str> = BTreeSet::new();

        for signature in &envelope.signatures {
            if !role.key_ids.contains(&signature.key_id) {
                continue;
            }
            if verified.contains(signature.key_id.as_str()) {
                continue;
            }
            let Some(key) = keys.get(&signature.key_id) else {
                tracing::debug!(key_id = %signature.key_id, "signing key not in key table");
                continue;
            };
            let Ok(raw) = hex::decode(&signature.value) else {
                tracing::debug!(key_id = %signature.key_id, "signature is not valid hex");
                continue;
            };
            match self.verify_raw(key, &message, &raw) {
                Ok(()) => {
                    verified.insert(signature.key_id.as_str());
                }
                Err(err) => {
                    tracing::debug!(key_id = %signature.key_id, %err, "signature rejected");
                }
            }
        }

        if (verified.len() as u32) >= role.threshold {
            Ok(())
        } else {
            Err(VerifyError::ThresholdNotMet {
                required: role.threshold,
                valid: verified.len() as u32,
            })
        }
    }
}
