//! On-disk cache of the last verified metadata envelopes.
//!
//! Files are written only after full verification, via a temp file in the
//! cache directory followed by an atomic rename, so a crash never leaves a
//! partially written document behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use citadel_core::Role;

use crate::error::UpdateError;

/// Cache directory holding `{root,timestamp,snapshot,targets}.json`.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    dir: PathBuf,
}

impl MetadataCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a role's cached metadata file.
    pub fn path(&self, role: Role) -> PathBuf {
        self.dir.join(role.metadata_file())
    }

    /// Load a role's cached bytes, if present.
    pub fn load(&self, role: Role) -> Result<Option<Vec<u8>>, UpdateError> {
        match fs::read(self.path(role)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically replace a role's cached bytes.
    pub fn store(&self, role: Role, bytes: &[u8]) -> Result<(), UpdateError> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(role)).map_err(|err| err.error)?;
        Ok(())
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
