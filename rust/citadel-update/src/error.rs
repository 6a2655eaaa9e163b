//! Update client error type.

use chrono::{DateTime, Utc};
use citadel_core::{Role, VerifyError};

/// Errors produced by the update verification pipeline.
///
/// Cryptographic and integrity failures are never recovered locally: the
/// current operation aborts and the persistent metadata cache is left
/// untouched. `Network` errors are retryable by callers.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// A network request failed; the caller may retry.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A metadata document could not be parsed or is structurally invalid.
    #[error("malformed metadata: {0}")]
    Malformed(String),

    /// A metadata document is past its expiration.
    #[error("{role} metadata expired at {expires}")]
    ExpiredMetadata { role: Role, expires: DateTime<Utc> },

    /// A metadata version went backwards.
    #[error("version regression for {scope}: current {current}, received {received}")]
    VersionRegression {
        scope: String,
        current: u64,
        received: u64,
    },

    /// The requested target is not listed in the targets metadata.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// A downloaded document or artifact does not match its expected hash.
    #[error("{algorithm} hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    /// A downloaded document or artifact has the wrong length.
    #[error("length mismatch for {name}: expected {expected}, got {actual}")]
    LengthMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Signature verification failed.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// An operation ran before its prerequisite state was established.
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),
}

impl UpdateError {
    pub(crate) fn malformed(err: impl std::fmt::Display) -> Self {
        UpdateError::Malformed(err.to_string())
    }
}
