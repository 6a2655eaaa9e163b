//! Server-side error type.

/// Errors raised while running the log receiver.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("tls setup failed: {0}")]
    Tls(String),

    /// A client submission is inconsistent with its prior chain.
    #[error("tamper suspected for {client_id}: {reason}")]
    TamperSuspected { client_id: String, reason: String },

    #[error(transparent)]
    Log(#[from] citadel_transparency::LogError),
}

impl From<rustls::Error> for ServerError {
    fn from(err: rustls::Error) -> Self {
        ServerError::Tls(err.to_string())
    }
}
