//! Log server configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Server configuration, loaded from a JSON file. Missing file means
/// defaults; missing fields fall back individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory for received batches and the integrity database.
    pub storage_path: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// CA bundle that client certificates must chain to.
    pub ca_file: PathBuf,
    /// Maximum accepted batch size in bytes.
    pub max_log_size: u64,
    /// Retention window for stored batches.
    pub retention_days: u32,
    /// Directory of per-client verification keys (`<client_id>.pub`).
    pub client_keys_dir: PathBuf,
    /// Directory of the server's own transparency log.
    pub transparency_log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            storage_path: PathBuf::from("/var/log/remote"),
            cert_file: PathBuf::from("/etc/ssl/certs/log-server.crt"),
            key_file: PathBuf::from("/etc/ssl/private/log-server.key"),
            ca_file: PathBuf::from("/etc/ssl/certs/ca.crt"),
            max_log_size: 100 * 1024 * 1024,
            retention_days: 90,
            client_keys_dir: PathBuf::from("/etc/citadel/log-server/client-keys"),
            transparency_log_dir: PathBuf::from("/var/lib/citadel/transparency-log"),
        }
    }
}

impl ServerConfig {
    /// Load the configuration from `path`, using defaults when the file is
    /// absent.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file missing, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.max_log_size, 100 * 1024 * 1024);
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 9443, "storage_path": "/tmp/logs"}"#).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 9443);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/logs"));
        assert_eq!(config.host, "0.0.0.0");
    }
}
