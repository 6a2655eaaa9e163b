//! Persisted rollout state.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RolloutError;
use crate::health::HealthReport;

/// File name of the persisted state inside the rollout directory.
pub const STATE_FILE: &str = "rollout-state.json";

/// Maximum number of retained health reports.
pub const MAX_HEALTH_REPORTS: usize = 100;

/// Lifecycle of a rollout.
///
/// `Active` can move to `RolledBack` (automatic or manual) or `Complete`
/// (explicit). Both are terminal: reports are still recorded afterwards but
/// no further evaluation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Active,
    RolledBack,
    Complete,
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutStatus::Active => write!(f, "active"),
            RolloutStatus::RolledBack => write!(f, "rolled_back"),
            RolloutStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Per-deployment rollout record, persisted as `rollout-state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub update_id: String,
    /// Free-form operator description of the update.
    pub update_info: String,
    pub start_time: DateTime<Utc>,
    pub status: RolloutStatus,
    #[serde(default)]
    pub health_reports: Vec<HealthReport>,
    #[serde(default)]
    pub rollback_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_time: Option<DateTime<Utc>>,
}

impl RolloutState {
    /// A fresh active rollout starting now.
    pub fn begin(update_id: impl Into<String>, update_info: impl Into<String>) -> Self {
        Self {
            update_id: update_id.into(),
            update_info: update_info.into(),
            start_time: Utc::now(),
            status: RolloutStatus::Active,
            health_reports: Vec::new(),
            rollback_triggered: false,
            rollback_time: None,
        }
    }

    /// Hours elapsed since the rollout started.
    pub fn elapsed_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.start_time).num_seconds() as f64 / 3600.0
    }

    /// Append a health report, keeping only the most recent
    /// [`MAX_HEALTH_REPORTS`].
    pub fn push_report(&mut self, report: HealthReport) {
        self.health_reports.push(report);
        if self.health_reports.len() > MAX_HEALTH_REPORTS {
            let excess = self.health_reports.len() - MAX_HEALTH_REPORTS;
            self.health_reports.drain(..excess);
        }
    }

    /// Load the state file from `dir`, if one exists.
    pub fn load(dir: &Path) -> Result<Option<Self>, RolloutError> {
        match fs::read(dir.join(STATE_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically persist the state into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), RolloutError> {
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(STATE_FILE))
            .map_err(|err| RolloutError::Io(err.error))?;
        Ok(())
    }
}
