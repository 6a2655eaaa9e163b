//! Secure update client.
//!
//! Fetches signed metadata and target artifacts from an update server,
//! verifies them end-to-end, and materializes verified files on disk.
//!
//! ## Metadata roles
//!
//! - **Root** — the trust anchor: key table and role thresholds
//! - **Timestamp** — references the current snapshot, prevents rollback
//! - **Snapshot** — records versions and hashes of all metadata files
//! - **Targets** — maps artifact names to lengths and hashes
//!
//! ## Security properties
//!
//! - **Freshness**: expired metadata is rejected and the previous cache kept
//! - **Rollback protection**: versions are monotonically non-decreasing
//! - **Referential integrity**: each step pins the next by hash and length
//! - **Artifact integrity**: downloads verify length, SHA-256, and SHA-512
//!   before anything appears at the final path

pub mod cache;
pub mod client;
pub mod error;
pub mod metadata;
pub mod transport;

pub use client::{RootInit, UpdateClient};
pub use error::UpdateError;
pub use metadata::{
    MetaRef, RootMetadata, SnapshotMetadata, TargetSpec, TargetsMetadata, TimestampMetadata,
};
pub use transport::{HttpTransport, MetadataTransport, TransportConfig};
