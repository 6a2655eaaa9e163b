//! Staged rollout controller.
//!
//! Deterministically assigns each node to a rollout cohort, gates update
//! eligibility by time-based stages, collects health telemetry, and triggers
//! automatic rollbacks when health degrades.
//!
//! ## Model
//!
//! A rollout walks an ordered list of stages, each widening the eligible
//! cohort (e.g. canary 1% → early 10% → full 100%). A node's cohort bucket
//! is a pure function of `(update_id, system_id)`, so the same machines land
//! in the canary for a given update on every call, across reboots and
//! processes. Health reports feed a rollback state machine: too many
//! critical reports in the recent window stops the rollout.

pub mod cohort;
pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod state;

pub use cohort::{cohort_bucket, system_id};
pub use config::{HealthCheckConfig, RollbackConfig, RolloutConfig, Stage};
pub use controller::{
    Decision, DecisionReason, NoopSink, RolloutController, RolloutEvent, RolloutEventKind,
    RolloutEventSink, RolloutStatusReport,
};
pub use error::RolloutError;
pub use health::{CheckResult, HealthProbe, HealthReport, HealthStatus};
pub use state::{RolloutState, RolloutStatus};
