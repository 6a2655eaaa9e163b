//! Merkle tree-based transparency log.
//!
//! An append-only, tamper-evident record of update releases, rollout
//! events, and security events. Entries are journaled as canonical JSON
//! lines and hashed into an RFC 6962-style Merkle tree; inclusion proofs
//! let third parties verify that an entry is present under a published
//! root without replaying the whole log.
//!
//! ## Security properties
//!
//! - **Append-only**: entries are never rewritten; `log_index` is never
//!   reused or gapped
//! - **Tamper-evident**: any modification changes the root hash
//! - **Verifiable**: inclusion proofs reconstruct the root from a leaf
//! - **Recoverable**: the root pointer is rebuilt from the journal when a
//!   crash leaves it behind

pub mod error;
pub mod log;
pub mod merkle;

pub use error::LogError;
pub use log::{EntryType, LogConfig, LogEntry, LogInfo, TransparencyLog};
pub use merkle::{InclusionProof, MerkleTree, ProofStep};
