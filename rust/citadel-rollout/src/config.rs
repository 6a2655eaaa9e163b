//! Rollout configuration: stages, health thresholds, rollback policy.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RolloutError;

/// File name of the persisted configuration inside the rollout directory.
pub const CONFIG_FILE: &str = "rollout-config.json";

/// One rollout phase with a target percentage and duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name (e.g. `canary`).
    pub name: String,
    /// Target percentage of the fleet eligible during this stage, 0–100.
    pub percentage: u32,
    /// Stage duration in hours; `0` marks the final open-ended stage.
    pub duration_hours: u64,
}

/// Health evaluation thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Percentage of critical reports in the recent window that triggers a
    /// rollback.
    pub failure_threshold: u32,
    /// Percentage of healthy reports considered a successful stage.
    pub success_threshold: u32,
}

/// Rollback policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackConfig {
    pub enabled: bool,
    /// Trigger rollbacks from health evaluation without operator action.
    pub automatic: bool,
}

/// Full rollout configuration, persisted as `rollout-config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub stages: Vec<Stage>,
    pub health_checks: HealthCheckConfig,
    pub rollback: RollbackConfig,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                Stage {
                    name: "canary".to_string(),
                    percentage: 1,
                    duration_hours: 24,
                },
                Stage {
                    name: "early".to_string(),
                    percentage: 10,
                    duration_hours: 48,
                },
                Stage {
                    name: "gradual".to_string(),
                    percentage: 50,
                    duration_hours: 72,
                },
                Stage {
                    name: "full".to_string(),
                    percentage: 100,
                    duration_hours: 0,
                },
            ],
            health_checks: HealthCheckConfig {
                enabled: true,
                failure_threshold: 5,
                success_threshold: 95,
            },
            rollback: RollbackConfig {
                enabled: true,
                automatic: true,
            },
        }
    }
}

impl RolloutConfig {
    /// Load the configuration from `dir`, writing the defaults when absent.
    pub fn load_or_init(dir: &Path) -> Result<Self, RolloutError> {
        let path = dir.join(CONFIG_FILE);
        match fs::read(&path) {
            Ok(bytes) => {
                let config: RolloutConfig = serde_json::from_slice(&bytes)?;
                config.validate()?;
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = RolloutConfig::default();
                config.save(dir)?;
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically persist the configuration into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), RolloutError> {
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(CONFIG_FILE))
            .map_err(|err| RolloutError::Io(err.error))?;
        Ok(())
    }

    /// Enforce the stage invariants: percentages within 0–100 and
    /// non-decreasing, and a final open-ended stage.
    pub fn validate(&self) -> Result<(), RolloutError> {
        if self.stages.is_empty() {
            return Err(RolloutError::InvalidConfig("no stages defined".to_string()));
        }
        let mut previous = 0u32;
        for stage in &self.stages {
            if stage.percentage > 100 {
                return Err(RolloutError::InvalidConfig(format!(
                    "stage {} percentage {} exceeds 100",
                    stage.name, stage.percentage
                )));
            }
            if stage.percentage < previous {
                return Err(RolloutError::InvalidConfig(format!(
                    "stage {} percentage {} decreases from {}",
                    stage.name, stage.percentage, previous
                )));
            }
            previous = stage.percentage;
        }
        let last = self.stages.last().expect("stages checked non-empty");
        if last.duration_hours != 0 {
            return Err(RolloutError::InvalidConfig(
                "final stage must have duration_hours = 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RolloutConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stages.len(), 4);
        assert_eq!(config.stages[0].name, "canary");
        assert_eq!(config.stages[3].duration_hours, 0);
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RolloutConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config, RolloutConfig::default());
        assert!(dir.path().join(CONFIG_FILE).exists());

        // A second load reads the persisted file.
        let reloaded = RolloutConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_validate_rejects_decreasing_percentages() {
        let mut config = RolloutConfig::default();
        config.stages[1].percentage = 0;
        assert!(matches!(
            config.validate(),
            Err(RolloutError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bounded_final_stage() {
        let mut config = RolloutConfig::default();
        config.stages.last_mut().unwrap().duration_hours = 12;
        assert!(matches!(
            config.validate(),
            Err(RolloutError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_over_100() {
        let mut config = RolloutConfig::default();
        config.stages[3].percentage = 101;
        assert!(matches!(
            config.validate(),
            Err(RolloutError::InvalidConfig(_))
        ));
    }
}
