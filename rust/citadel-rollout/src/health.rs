//! Health reports and the probe interface.
//!
//! The controller is agnostic to which probes exist; anything implementing
//! [`HealthProbe`] can contribute a check. Probes live with the binaries
//! (load average, disk, memory, service liveness) and stay trivial.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single check or an aggregated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    /// Probe-specific measurements (e.g. `used_percent`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl CheckResult {
    /// A result with a status and no metrics.
    pub fn status_only(status: HealthStatus) -> Self {
        Self {
            status,
            metrics: BTreeMap::new(),
        }
    }
}

/// A system health probe. Implementations are external collaborators; the
/// controller only consumes their aggregated reports.
pub trait HealthProbe {
    /// Check name as recorded in the report (e.g. `load_average`).
    fn name(&self) -> &str;
    /// Run the probe. Must not fail; degraded environments report
    /// [`HealthStatus::Unknown`].
    fn check(&self) -> CheckResult;
}

/// A timestamped set of check results with an aggregated status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, CheckResult>,
    pub overall_status: HealthStatus,
}

impl HealthReport {
    /// Aggregate check results: critical dominates, then warning, then
    /// unknown; all-healthy reports are healthy.
    pub fn aggregate(checks: BTreeMap<String, CheckResult>) -> Self {
        let statuses: Vec<HealthStatus> = checks.values().map(|check| check.status).collect();
        let overall_status = if statuses.contains(&HealthStatus::Critical) {
            HealthStatus::Critical
        } else if statuses.contains(&HealthStatus::Warning) {
            HealthStatus::Warning
        } else if statuses.contains(&HealthStatus::Unknown) {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };
        Self {
            timestamp: Utc::now(),
            checks,
            overall_status,
        }
    }

    /// Run every probe and aggregate the results.
    pub fn collect(probes: &[Box<dyn HealthProbe>]) -> Self {
        let checks = probes
            .iter()
            .map(|probe| (probe.name().to_string(), probe.check()))
            .collect();
        Self::aggregate(checks)
    }

    /// A report with a single synthetic check, mainly for tests and manual
    /// submissions.
    pub fn with_status(status: HealthStatus) -> Self {
        let mut checks = BTreeMap::new();
        checks.insert("manual".to_string(), CheckResult::status_only(status));
        Self::aggregate(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checks_of(statuses: &[(&str, HealthStatus)]) -> BTreeMap<String, CheckResult> {
        statuses
            .iter()
            .map(|(name, status)| (name.to_string(), CheckResult::status_only(*status)))
            .collect()
    }

    #[test]
    fn test_aggregate_critical_dominates() {
        let report = HealthReport::aggregate(checks_of(&[
            ("a", HealthStatus::Healthy),
            ("b", HealthStatus::Critical),
            ("c", HealthStatus::Warning),
        ]));
        assert_eq!(report.overall_status, HealthStatus::Critical);
    }

    #[test]
    fn test_aggregate_warning_over_unknown() {
        let report = HealthReport::aggregate(checks_of(&[
            ("a", HealthStatus::Unknown),
            ("b", HealthStatus::Warning),
        ]));
        assert_eq!(report.overall_status, HealthStatus::Warning);
    }

    #[test]
    fn test_aggregate_all_healthy() {
        let report = HealthReport::aggregate(checks_of(&[
            ("a", HealthStatus::Healthy),
            ("b", HealthStatus::Healthy),
        ]));
        assert_eq!(report.overall_status, HealthStatus::Healthy);
    }

    #[test]
    fn test_aggregate_unknown_when_no_signal() {
        let report = HealthReport::aggregate(checks_of(&[("a", HealthStatus::Unknown)]));
        assert_eq!(report.overall_status, HealthStatus::Unknown);
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Critical).unwrap(),
            r#""critical""#
        );
    }
}
