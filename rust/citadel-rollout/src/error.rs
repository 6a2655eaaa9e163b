//! Rollout controller error type.

/// Errors produced by the rollout controller.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// A filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted config or state file could not be parsed.
    #[error("malformed rollout file: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The rollout configuration violates its invariants.
    #[error("invalid rollout config: {0}")]
    InvalidConfig(String),

    /// The requested transition conflicts with the current rollout state.
    #[error("state conflict: {0}")]
    StateConflict(String),
}
