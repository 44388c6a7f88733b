//! Aggregated health reporting.
//!
//! The daemon's status is the worst status among its enabled modules:
//!
//! - all Healthy -> Healthy
//! - any Degraded, none Unhealthy -> Degraded(reasons)
//! - any Unhealthy -> Unhealthy(reasons)

use serde::Serialize;

use honeyflow_core::pipeline::HealthStatus;

/// Health report for the whole daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub modules: Vec<ModuleHealth>,
}

/// Health of one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// e.g. "flow-engine", "southbound"
    pub name: String,
    pub enabled: bool,
    pub status: HealthStatus,
}

/// Fold module statuses into one. Disabled modules are ignored.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for module in modules.iter().filter(|m| m.enabled) {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                degraded.push(format!("{}: {}", module.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {}", module.name, reason));
            }
        }
    }

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}
