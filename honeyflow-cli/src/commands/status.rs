//! `honeyflow status` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{MODULE_CONTROL, MODULE_FLOW_ENGINE, MODULE_SOUTHBOUND};

use crate::cli::StatusArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

pub async fn execute(
    args: StatusArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = HoneyflowConfig::load(config_path).await?;
    let daemon_pid = running_pid(&config.general.pid_file);
    let report = build_report(&config, daemon_pid, args.verbose);
    writer.render(&report)
}

/// Module table derived from the configuration and daemon liveness.
pub fn build_report(config: &HoneyflowConfig, daemon_pid: Option<u32>, verbose: bool) -> StatusReport {
    let running = daemon_pid.is_some();
    let module = |name: &str, enabled: bool, details: String| ModuleStatus {
        name: name.to_owned(),
        enabled,
        health: match (enabled, running) {
            (false, _) => "disabled",
            (true, true) => "running",
            (true, false) => "stopped",
        }
        .to_owned(),
        details: verbose.then_some(details),
    };

    let mut engine_details = format!(
        "workers={}, sweep={}s, honeypots={}/{}",
        config.engine.workers,
        config.engine.sweep_interval_secs,
        config.honeypots.triage.ip,
        config.honeypots.deep.ip
    );
    if config.load_balancer.enabled {
        engine_details.push_str(&format!(
            ", vip={} ({} backends)",
            config.load_balancer.vip,
            config.load_balancer.backends.len()
        ));
    }
    if config.oracle.enabled {
        engine_details.push_str(&format!(
            ", oracle={} ({}ms)",
            config.oracle.addr, config.oracle.timeout_ms
        ));
    }

    let modules = vec![
        module(MODULE_FLOW_ENGINE, true, engine_details),
        module(
            MODULE_SOUTHBOUND,
            config.southbound.enabled,
            format!(
                "bind={}, max_connections={}",
                config.southbound.bind, config.southbound.max_connections
            ),
        ),
        module(
            MODULE_CONTROL,
            config.control.enabled,
            format!(
                "bind={}, max_connections={}",
                config.control.bind, config.control.max_connections
            ),
        ),
    ];

    StatusReport {
        daemon_running: running,
        pid: daemon_pid,
        modules,
    }
}

/// PID from the daemon's PID file, if that process is still alive.
pub fn running_pid(pid_file: &str) -> Option<u32> {
    if pid_file.is_empty() {
        debug!("no pid file configured");
        return None;
    }
    let content = match std::fs::read_to_string(pid_file) {
        Ok(content) => content,
        Err(e) => {
            debug!(pid_file, error = %e, "pid file not readable");
            return None;
        }
    };
    let pid = match content.trim().parse::<u32>() {
        Ok(pid) => pid,
        Err(e) => {
            warn!(pid_file, error = %e, "failed to parse pid");
            return None;
        }
    };
    is_process_alive(pid).then_some(pid)
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 only checks for existence.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // exists but owned by another user
    std::io::Error::last_os_error().kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    false
}

#[derive(Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub modules: Vec<ModuleStatus>,
}

#[derive(Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub enabled: bool,
    pub health: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let daemon = match self.pid {
            Some(pid) => format!("{} (pid {pid})", "running".green().bold()),
            None => "stopped".red().bold().to_string(),
        };
        writeln!(w, "Daemon: {daemon}")?;
        writeln!(w)?;
        writeln!(w, "Modules:")?;

        for module in &self.modules {
            let health = match module.health.as_str() {
                "running" => module.health.green(),
                "stopped" => module.health.red(),
                _ => module.health.dimmed(),
            };
            writeln!(w, "  {:<12} {}", module.name, health)?;
            if let Some(details) = &module.details {
                writeln!(w, "    {}", details.dimmed())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(report: &StatusReport) -> String {
        let mut buf = Vec::new();
        report.render_text(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn test_report_when_daemon_stopped() {
        let report = build_report(&HoneyflowConfig::default(), None, false);

        assert!(!report.daemon_running);
        let names: Vec<_> = report.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["flow-engine", "southbound", "control"]);
        assert!(report.modules.iter().all(|m| m.health == "stopped"));
        assert!(report.modules.iter().all(|m| m.details.is_none()));
    }

    #[test]
    fn test_report_marks_disabled_modules() {
        let mut config = HoneyflowConfig::default();
        config.control.enabled = false;

        let report = build_report(&config, Some(4242), false);

        assert!(report.daemon_running);
        assert_eq!(report.modules[0].health, "running");
        assert_eq!(report.modules[2].health, "disabled");
        assert!(!report.modules[2].enabled);
    }

    #[test]
    fn test_verbose_details_mention_vip_and_oracle() {
        let mut config = HoneyflowConfig::default();
        config.oracle.enabled = true;

        let report = build_report(&config, None, true);

        let engine = report.modules[0].details.as_deref().expect("details");
        assert!(engine.contains("vip=10.0.0.100 (3 backends)"), "{engine}");
        assert!(engine.contains("oracle=127.0.0.1:50051 (1000ms)"), "{engine}");
        let southbound = report.modules[1].details.as_deref().expect("details");
        assert!(southbound.contains("bind=127.0.0.1:6653"));
    }

    #[test]
    fn test_render_text_shows_pid() {
        let report = build_report(&HoneyflowConfig::default(), Some(77), false);
        let text = render(&report);
        assert!(text.contains("pid 77"));
        assert!(text.contains("flow-engine"));
    }

    #[test]
    fn test_running_pid_missing_file() {
        assert_eq!(running_pid("/nonexistent/honeyflow.pid"), None);
        assert_eq!(running_pid(""), None);
    }

    #[test]
    fn test_running_pid_garbage_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("honeyflow.pid");
        std::fs::write(&path, "not-a-pid\n").expect("write");

        assert_eq!(running_pid(path.to_str().expect("utf8 path")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_running_pid_detects_own_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("honeyflow.pid");
        std::fs::write(&path, format!("{}\n", std::process::id())).expect("write");

        assert_eq!(
            running_pid(path.to_str().expect("utf8 path")),
            Some(std::process::id())
        );
    }
}
