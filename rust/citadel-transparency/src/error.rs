//! Transparency log error type.

use citadel_core::CanonicalError;

/// Errors produced by the transparency log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A journal line or state file could not be parsed.
    #[error("malformed log file: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An entry could not be canonicalized for hashing.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// The requested index is outside the log.
    #[error("log index {index} out of range (tree size {tree_size})")]
    OutOfRange { index: u64, tree_size: u64 },
}
