//! Core cryptographic primitives for the Citadel update system.
//!
//! This crate provides the building blocks shared by the update client, the
//! transparency log, and the log receiver:
//!
//! - **Canonical JSON**: the deterministic byte form over which everything
//!   is hashed and signed ([`canonical`])
//! - **Digests**: SHA-256 / SHA-512 helpers ([`digest`])
//! - **Keys and roles**: the key table, role definitions, and signing
//!   algorithms ([`keys`])
//! - **Envelope verification**: threshold signature verification over
//!   canonical bytes ([`verify`])

pub mod canonical;
pub mod digest;
pub mod keys;
pub mod verify;

pub use canonical::{to_canonical_json, CanonicalError};
pub use keys::{Algorithm, KeyId, PublicKey, Role, RoleSpec};
pub use verify::{Signature, SignedEnvelope, VerifierRegistry, VerifyError};
