//! The rollout controller and rollback state machine.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cohort::cohort_bucket;
use crate::config::{RolloutConfig, Stage};
use crate::error::RolloutError;
use crate::health::{HealthReport, HealthStatus};
use crate::state::{RolloutState, RolloutStatus};

/// Number of recent reports considered by rollback evaluation.
const ROLLBACK_WINDOW: usize = 10;

/// Minimum reports before rollback evaluation runs.
const ROLLBACK_MIN_REPORTS: usize = 5;

/// Kind of a rollout event published to the transparency log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutEventKind {
    Start,
    Rollback,
    Complete,
}

impl std::fmt::Display for RolloutEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutEventKind::Start => write!(f, "start"),
            RolloutEventKind::Rollback => write!(f, "rollback"),
            RolloutEventKind::Complete => write!(f, "complete"),
        }
    }
}

/// A rollout lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutEvent {
    pub update_id: String,
    pub kind: RolloutEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
}

/// Destination for rollout events; the CLI wires this to the transparency
/// log.
pub trait RolloutEventSink {
    fn record(&mut self, event: &RolloutEvent);
}

/// Sink that drops events, for callers without a log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl RolloutEventSink for NoopSink {
    fn record(&mut self, _event: &RolloutEvent) {}
}

/// Why a node is or is not eligible for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoActiveRollout,
    RolledBack,
    StageEligible,
    NotInCurrentStage,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::NoActiveRollout => write!(f, "no_active_rollout"),
            DecisionReason::RolledBack => write!(f, "rolled_back"),
            DecisionReason::StageEligible => write!(f, "stage_eligible"),
            DecisionReason::NotInCurrentStage => write!(f, "not_in_current_stage"),
        }
    }
}

/// Eligibility verdict for one node and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub eligible: bool,
    pub reason: DecisionReason,
    /// The node's cohort bucket, 0–99.
    pub bucket: u32,
    /// Name and target percentage of the stage currently in its window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_percentage: Option<u32>,
}

/// Health summary over the recent report window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total_reports: usize,
    pub recent_reports: usize,
    pub healthy_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
}

/// Snapshot of a rollout for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStatusReport {
    pub status: RolloutStatus,
    pub update_id: String,
    pub start_time: chrono::DateTime<Utc>,
    pub elapsed_hours: f64,
    pub current_stage: Option<Stage>,
    pub rollback_triggered: bool,
    pub health_summary: HealthSummary,
}

/// Drives rollout state transitions against a rollout directory.
#[derive(Debug)]
pub struct RolloutController {
    dir: PathBuf,
    config: RolloutConfig,
}

impl RolloutController {
    /// Open a controller on `dir`, loading or initializing the config.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RolloutError> {
        let dir = dir.into();
        let config = RolloutConfig::load_or_init(&dir)?;
        Ok(Self { dir, config })
    }

    /// Open a controller with an explicit config, persisting it.
    pub fn with_config(
        dir: impl Into<PathBuf>,
        config: RolloutConfig,
    ) -> Result<Self, RolloutError> {
        config.validate()?;
        let dir = dir.into();
        config.save(&dir)?;
        Ok(Self { dir, config })
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a staged rollout for `update_id`.
    ///
    /// Fails with a state conflict while a rollout for a *different* update
    /// is still active; that rollout must be completed or rolled back first.
    pub fn start_rollout(
        &self,
        update_id: &str,
        update_info: &str,
        sink: &mut dyn RolloutEventSink,
    ) -> Result<RolloutState, RolloutError> {
        if let Some(existing) = RolloutState::load(&self.dir)? {
            if existing.status == RolloutStatus::Active && existing.update_id != update_id {
                return Err(RolloutError::StateConflict(format!(
                    "rollout for {} is still active",
                    existing.update_id
                )));
            }
        }
        let state = RolloutState::begin(update_id, update_info);
        state.save(&self.dir)?;

        let first = self.config.stages.first();
        sink.record(&RolloutEvent {
            update_id: update_id.to_string(),
            kind: RolloutEventKind::Start,
            stage: first.map(|stage| stage.name.clone()),
            percentage: first.map(|stage| stage.percentage),
            health_status: None,
        });
        tracing::info!(update_id, stages = self.config.stages.len(), "rollout started");
        Ok(state)
    }

    /// The stage whose time window currently applies, if any.
    ///
    /// Stages whose window has expired are skipped; the first stage still in
    /// its window decides eligibility, so during the canary window only the
    /// canary cohort is eligible. A stage's window ends exactly at its
    /// cumulative offset; the final `duration_hours = 0` stage never expires.
    pub fn active_stage(&self, elapsed_hours: f64) -> Option<&Stage> {
        let mut cumulative_hours = 0u64;
        for stage in &self.config.stages {
            cumulative_hours += stage.duration_hours;
            if elapsed_hours < cumulative_hours as f64 || stage.duration_hours == 0 {
                return Some(stage);
            }
        }
        None
    }

    /// Should this node receive `update_id` right now?
    pub fn should_receive(
        &self,
        update_id: &str,
        system_id: &str,
    ) -> Result<Decision, RolloutError> {
        let bucket = cohort_bucket(update_id, system_id);

        let Some(state) = RolloutState::load(&self.dir)? else {
            return Ok(Decision {
                eligible: false,
                reason: DecisionReason::NoActiveRollout,
                bucket,
                stage: None,
                stage_percentage: None,
            });
        };
        if state.update_id != update_id || state.status == RolloutStatus::Complete {
            return Ok(Decision {
                eligible: false,
                reason: DecisionReason::NoActiveRollout,
                bucket,
                stage: None,
                stage_percentage: None,
            });
        }
        if state.rollback_triggered || state.status == RolloutStatus::RolledBack {
            return Ok(Decision {
                eligible: false,
                reason: DecisionReason::RolledBack,
                bucket,
                stage: None,
                stage_percentage: None,
            });
        }

        let elapsed = state.elapsed_hours(Utc::now());
        match self.active_stage(elapsed) {
            Some(stage) => {
                let eligible = bucket < stage.percentage;
                Ok(Decision {
                    eligible,
                    reason: if eligible {
                        DecisionReason::StageEligible
                    } else {
                        DecisionReason::NotInCurrentStage
                    },
                    bucket,
                    stage: Some(stage.name.clone()),
                    stage_percentage: Some(stage.percentage),
                })
            }
            None => Ok(Decision {
                eligible: false,
                reason: DecisionReason::NotInCurrentStage,
                bucket,
                stage: None,
                stage_percentage: None,
            }),
        }
    }

    /// Record a health report and evaluate the rollback condition.
    ///
    /// Terminal rollouts still record reports but are never re-evaluated.
    pub fn report_health(
        &self,
        update_id: &str,
        report: HealthReport,
        sink: &mut dyn RolloutEventSink,
    ) -> Result<RolloutState, RolloutError> {
        let mut state = RolloutState::load(&self.dir)?.ok_or_else(|| {
            RolloutError::StateConflict(format!("no active rollout for {update_id}"))
        })?;
        if state.update_id != update_id {
            return Err(RolloutError::StateConflict(format!(
                "no active rollout for {update_id}"
            )));
        }

        state.push_report(report);
        if state.status == RolloutStatus::Active {
            self.evaluate_rollback(&mut state, sink);
        }
        state.save(&self.dir)?;
        Ok(state)
    }

    /// Manually stop an active rollout.
    pub fn trigger_rollback(
        &self,
        update_id: &str,
        sink: &mut dyn RolloutEventSink,
    ) -> Result<RolloutState, RolloutError> {
        let mut state = self.load_active(update_id)?;
        self.apply_rollback(&mut state, None, sink);
        state.save(&self.dir)?;
        Ok(state)
    }

    /// Explicitly mark an active rollout as complete.
    pub fn complete_rollout(
        &self,
        update_id: &str,
        sink: &mut dyn RolloutEventSink,
    ) -> Result<RolloutState, RolloutError> {
        let mut state = self.load_active(update_id)?;
        state.status = RolloutStatus::Complete;
        state.save(&self.dir)?;
        sink.record(&RolloutEvent {
            update_id: update_id.to_string(),
            kind: RolloutEventKind::Complete,
            stage: None,
            percentage: None,
            health_status: None,
        });
        tracing::info!(update_id, "rollout complete");
        Ok(state)
    }

    /// Operator-facing snapshot of the current rollout.
    pub fn rollout_status(
        &self,
        update_id: Option<&str>,
    ) -> Result<Option<RolloutStatusReport>, RolloutError> {
        let Some(state) = RolloutState::load(&self.dir)? else {
            return Ok(None);
        };
        if let Some(update_id) = update_id {
            if state.update_id != update_id {
                return Ok(None);
            }
        }

        let elapsed_hours = state.elapsed_hours(Utc::now());
        let recent = recent_reports(&state);
        let count_status = |status: HealthStatus| {
            recent
                .iter()
                .filter(|report| report.overall_status == status)
                .count()
        };

        Ok(Some(RolloutStatusReport {
            status: state.status,
            update_id: state.update_id.clone(),
            start_time: state.start_time,
            elapsed_hours,
            current_stage: self.active_stage(elapsed_hours).cloned(),
            rollback_triggered: state.rollback_triggered,
            health_summary: HealthSummary {
                total_reports: state.health_reports.len(),
                recent_reports: recent.len(),
                healthy_count: count_status(HealthStatus::Healthy),
                warning_count: count_status(HealthStatus::Warning),
                critical_count: count_status(HealthStatus::Critical),
            },
        }))
    }

    fn load_active(&self, update_id: &str) -> Result<RolloutState, RolloutError> {
        let state = RolloutState::load(&self.dir)?.ok_or_else(|| {
            RolloutError::StateConflict(format!("no active rollout for {update_id}"))
        })?;
        if state.update_id != update_id {
            return Err(RolloutError::StateConflict(format!(
                "no active rollout for {update_id}"
            )));
        }
        if state.status != RolloutStatus::Active {
            return Err(RolloutError::StateConflict(format!(
                "rollout for {update_id} is {}",
                state.status
            )));
        }
        Ok(state)
    }

    /// Trigger a rollback when too many of the recent reports are critical.
    fn evaluate_rollback(&self, state: &mut RolloutState, sink: &mut dyn RolloutEventSink) {
        let recent = recent_reports(state);
        if recent.len() < ROLLBACK_MIN_REPORTS {
            return;
        }
        let critical_count = recent
            .iter()
            .filter(|report| report.overall_status == HealthStatus::Critical)
            .count();
        let failure_rate = critical_count as f64 / recent.len() as f64 * 100.0;
        let threshold = self.config.health_checks.failure_threshold as f64;

        if failure_rate > threshold
            && self.config.rollback.enabled
            && self.config.rollback.automatic
        {
            tracing::warn!(
                update_id = %state.update_id,
                failure_rate,
                threshold,
                "rollback triggered by health evaluation"
            );
            self.apply_rollback(state, Some(HealthStatus::Critical), sink);
        }
    }

    fn apply_rollback(
        &self,
        state: &mut RolloutState,
        health_status: Option<HealthStatus>,
        sink: &mut dyn RolloutEventSink,
    ) {
        state.rollback_triggered = true;
        state.rollback_time = Some(Utc::now());
        state.status = RolloutStatus::RolledBack;
        sink.record(&RolloutEvent {
            update_id: state.update_id.clone(),
            kind: RolloutEventKind::Rollback,
            stage: None,
            percentage: None,
            health_status,
        });
        tracing::warn!(update_id = %state.update_id, "rollout stopped: rollback triggered");
    }
}

fn recent_reports(state: &RolloutState) -> &[HealthReport] {
    let reports = &state.health_reports;
    let start = reports.len().saturating_sub(ROLLBACK_WINDOW);
    &reports[start..]
}
