//! Transport abstraction for the update server.
//!
//! The verification pipeline is transport-agnostic; tests exercise it with
//! an in-memory implementation while production uses blocking HTTP against
//! the metadata and target endpoints.

use std::io::Write;
use std::time::Duration;

use citadel_core::Role;

use crate::error::UpdateError;

/// Fetches metadata documents and target artifacts.
pub trait MetadataTransport {
    /// Fetch the raw bytes of a role's metadata file.
    fn fetch_metadata(&self, role: Role) -> Result<Vec<u8>, UpdateError>;

    /// Stream a target artifact into `sink`, returning the byte count.
    fn fetch_target(&self, name: &str, sink: &mut dyn Write) -> Result<u64, UpdateError>;
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for metadata requests.
    pub metadata_timeout: Duration,
    /// Timeout for target downloads.
    pub target_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(30),
            target_timeout: Duration::from_secs(60),
        }
    }
}

/// Blocking HTTP transport against an update server.
///
/// Endpoints: `GET /metadata/{role}.json` and `GET /targets/{name}`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Create a transport with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpdateError> {
        Self::with_config(base_url, TransportConfig::default())
    }

    /// Create a transport with custom timeouts.
    pub fn with_config(
        base_url: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self, UpdateError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self {
            base_url,
            client,
            config,
        })
    }
}

impl MetadataTransport for HttpTransport {
    fn fetch_metadata(&self, role: Role) -> Result<Vec<u8>, UpdateError> {
        let url = format!("{}/metadata/{}", self.base_url, role.metadata_file());
        tracing::debug!(%url, "fetching metadata");
        let response = self
            .client
            .get(&url)
            .timeout(self.config.metadata_timeout)
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    fn fetch_target(&self, name: &str, sink: &mut dyn Write) -> Result<u64, UpdateError> {
        let url = format!("{}/targets/{}", self.base_url, name);
        tracing::debug!(%url, "fetching target");
        let mut response = self
            .client
            .get(&url)
            .timeout(self.config.target_timeout)
            .send()?
            .error_for_status()?;
        Ok(response.copy_to(sink)?)
    }
}
