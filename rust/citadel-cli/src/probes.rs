//! Built-in health probes.
//!
//! Trivial local measurements feeding the rollout controller's health
//! reports. Every probe degrades to `Unknown` instead of failing.

use std::collections::BTreeMap;
use std::process::Command;

use citadel_rollout::{CheckResult, HealthProbe, HealthStatus};
use serde_json::json;

/// 1-minute load average from `/proc/loadavg`.
pub struct LoadAverageProbe;

impl HealthProbe for LoadAverageProbe {
    fn name(&self) -> &str {
        "load_average"
    }

    fn check(&self) -> CheckResult {
        let Some(load) = std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|contents| contents.split_whitespace().next()?.parse::<f64>().ok())
        else {
            return CheckResult::status_only(HealthStatus::Unknown);
        };
        let status = if load < 2.0 {
            HealthStatus::Healthy
        } else if load < 5.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };
        let mut metrics = BTreeMap::new();
        metrics.insert("value".to_string(), json!(load));
        CheckResult { status, metrics }
    }
}

/// Root filesystem usage via `df /`.
pub struct DiskSpaceProbe;

impl HealthProbe for DiskSpaceProbe {
    fn name(&self) -> &str {
        "disk_space"
    }

    fn check(&self) -> CheckResult {
        let Some(used_percent) = df_used_percent() else {
            return CheckResult::status_only(HealthStatus::Unknown);
        };
        let status = if used_percent < 80 {
            HealthStatus::Healthy
        } else if used_percent < 95 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };
        let mut metrics = BTreeMap::new();
        metrics.insert("used_percent".to_string(), json!(used_percent));
        CheckResult { status, metrics }
    }
}

fn df_used_percent() -> Option<u32> {
    let output = Command::new("df").arg("/").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8(output.stdout).ok()?;
    let fields: Vec<&str> = stdout.lines().nth(1)?.split_whitespace().collect();
    fields.get(4)?.trim_end_matches('%').parse().ok()
}

/// Memory usage from `/proc/meminfo`.
pub struct MemoryProbe;

impl HealthProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory_usage"
    }

    fn check(&self) -> CheckResult {
        let Some(used_percent) = meminfo_used_percent() else {
            return CheckResult::status_only(HealthStatus::Unknown);
        };
        let status = if used_percent < 80.0 {
            HealthStatus::Healthy
        } else if used_percent < 95.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "used_percent".to_string(),
            json!((used_percent * 100.0).round() / 100.0),
        );
        CheckResult { status, metrics }
    }
}

fn meminfo_used_percent() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

/// Liveness of critical system services via `systemctl is-active`.
pub struct ServiceProbe {
    services: Vec<&'static str>,
}

impl Default for ServiceProbe {
    fn default() -> Self {
        Self {
            services: vec!["systemd", "networkd", "nftables"],
        }
    }
}

impl HealthProbe for ServiceProbe {
    fn name(&self) -> &str {
        "critical_services"
    }

    fn check(&self) -> CheckResult {
        let mut states = serde_json::Map::new();
        let mut all_active = true;
        for service in &self.services {
            let state = match Command::new("systemctl")
                .args(["is-active", service])
                .output()
            {
                Ok(output) if output.status.success() => "active",
                Ok(_) => "inactive",
                Err(_) => "unknown",
            };
            if state != "active" {
                all_active = false;
            }
            states.insert((*service).to_string(), json!(state));
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("services".to_string(), serde_json::Value::Object(states));
        CheckResult {
            status: if all_active {
                HealthStatus::Healthy
            } else {
                HealthStatus::Critical
            },
            metrics,
        }
    }
}

/// The standard probe set used by `citadel rollout health`.
pub fn default_probes() -> Vec<Box<dyn HealthProbe>> {
    vec![
        Box::new(LoadAverageProbe),
        Box::new(DiskSpaceProbe),
        Box::new(MemoryProbe),
        Box::new(ServiceProbe::default()),
    ]
}
