//! Module assembly, channel wiring and lifecycle.
//!
//! The [`Orchestrator`] loads configuration, creates the channels between
//! the modules, builds them, and runs until SIGTERM or SIGINT.
//!
//! # Start order
//!
//! 1. Flow engine (workers drain the event channel)
//! 2. Southbound listener (produces events, consumes commands)
//! 3. Control listener (produces feedback, reads stats)
//!
//! Shutdown runs in reverse so the listeners stop feeding the engine first.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{ClassificationFeedback, ControllerCommand, SouthboundEvent};
use honeyflow_core::metrics as m;
use honeyflow_flow_engine::FlowDecisionEngine;

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};

const FEEDBACK_CHANNEL_CAPACITY: usize = 256;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The daemon's top-level coordinator.
pub struct Orchestrator {
    config: HoneyflowConfig,
    modules: ModuleRegistry,
    decision: Arc<FlowDecisionEngine>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    /// Held until `run` when the southbound listener is disabled.
    orphan_commands: Option<mpsc::Receiver<ControllerCommand>>,
    /// Keeps the event channel open when no adapter listener exists.
    _idle_event_tx: Option<mpsc::Sender<SouthboundEvent>>,
}

impl Orchestrator {
    /// Load `honeyflow.toml` (with env overrides) and build.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = HoneyflowConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    pub fn build_from_config(config: HoneyflowConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let (event_tx, event_rx) =
            mpsc::channel::<SouthboundEvent>(config.engine.event_channel_capacity);
        let (feedback_tx, feedback_rx) =
            mpsc::channel::<ClassificationFeedback>(FEEDBACK_CHANNEL_CAPACITY);
        let (command_tx, command_rx) =
            mpsc::channel::<ControllerCommand>(config.southbound.command_channel_capacity);
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut registry = ModuleRegistry::new();

        let (engine, decision) =
            modules::flow_engine::init(&config, event_rx, feedback_rx, command_tx)?;
        registry.register(engine);

        let mut orphan_commands = None;
        let mut idle_event_tx = None;
        if config.southbound.enabled {
            if let Some(handle) = modules::southbound::init(&config, event_tx, command_rx) {
                registry.register(handle);
            }
        } else {
            tracing::warn!("southbound listener disabled; controller commands will be discarded");
            orphan_commands = Some(command_rx);
            idle_event_tx = Some(event_tx);
        }

        if let Some(handle) = modules::control::init(&config, Arc::clone(&decision), feedback_tx) {
            registry.register(handle);
        }

        tracing::info!(
            modules = registry.count(),
            enabled = registry.enabled_count(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(registry.count());
        }

        Ok(Self {
            config,
            modules: registry,
            decision,
            shutdown_tx,
            start_time: Instant::now(),
            orphan_commands,
            _idle_event_tx: idle_event_tx,
        })
    }

    /// Start every module and block until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.pid_file();
        if let Some(path) = &pid_file {
            write_pid_file(Path::new(path))?;
        }

        if let Err(e) = self.modules.start_all().await {
            tracing::warn!("startup failed, stopping modules that did start");
            if let Err(stop_err) = self.modules.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback failed"
                );
            }
            if let Some(path) = &pid_file {
                remove_pid_file(Path::new(path));
            }
            return Err(e);
        }

        let mut background = Vec::new();
        if let Some(command_rx) = self.orphan_commands.take() {
            background.push(tokio::spawn(drain_commands(
                command_rx,
                self.shutdown_tx.subscribe(),
            )));
        }
        if self.config.metrics.enabled {
            background.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        tracing::info!("honeyflow running");
        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);
        let mut health_tick = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_tick.tick().await;

        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal?,
                _ = health_tick.tick() => self.log_health().await,
            }
        };
        tracing::info!(signal, "shutdown signal received");

        let _ = self.shutdown_tx.send(());
        for task in background {
            let _ = task.await;
        }

        let result = self.shutdown().await;

        if let Some(path) = &pid_file {
            remove_pid_file(Path::new(path));
        }
        result
    }

    /// Stop all modules, listeners first.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping all modules");
        self.modules.stop_all().await
    }

    /// Aggregated health of all modules.
    pub async fn health(&self) -> DaemonHealth {
        let modules: Vec<ModuleHealth> = self
            .modules
            .health_statuses()
            .await
            .into_iter()
            .map(|(name, enabled, status)| ModuleHealth {
                name,
                enabled,
                status,
            })
            .collect();

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
        }
    }

    async fn log_health(&self) {
        let health = self.health().await;
        if health.status.is_healthy() {
            tracing::debug!(uptime_secs = health.uptime_secs, "health check ok");
        } else {
            tracing::warn!(
                status = %health.status,
                uptime_secs = health.uptime_secs,
                "daemon health degraded"
            );
        }
    }

    pub fn config(&self) -> &HoneyflowConfig {
        &self.config
    }

    /// Shared decision engine, as seen by the control listener.
    pub fn decision_engine(&self) -> Arc<FlowDecisionEngine> {
        Arc::clone(&self.decision)
    }

    pub fn module_count(&self) -> usize {
        self.modules.count()
    }

    fn pid_file(&self) -> Option<String> {
        let path = self.config.general.pid_file.trim();
        (!path.is_empty()).then(|| path.to_owned())
    }
}

/// Wait for SIGTERM or SIGINT and return its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write this process's PID, refusing to overwrite an existing file.
///
/// The file is created atomically with `create_new`, must be a regular
/// file, and gets mode 0600. Its directory is created with mode 0700.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(parent)?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    let pid = std::process::id();
    writeln!(file, "{}", pid)?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}

/// Discard commands when no southbound listener exists, so the engine's
/// queue never fills and trips the dropped-command health check.
async fn drain_commands(
    mut command_rx: mpsc::Receiver<ControllerCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => tracing::trace!(
                    switch_id = command.switch_id(),
                    kind = command.kind(),
                    "command discarded, southbound disabled"
                ),
                None => break,
            },
            _ = shutdown_rx.recv() => break,
        }
    }
}

fn record_daemon_metrics(module_count: usize) {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    metrics::gauge!(m::DAEMON_MODULES_REGISTERED).set(module_count as f64);
}

fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs_f64());
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeyflow_core::event::{FlowInstall, FlowMatch};

    #[tokio::test]
    async fn drain_stops_on_shutdown() {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(drain_commands(command_rx, shutdown_rx));

        command_tx
            .send(ControllerCommand::InstallFlow(FlowInstall {
                switch_id: 1,
                priority: 0,
                flow_match: FlowMatch::any(),
                actions: Vec::new(),
                idle_timeout: 0,
                hard_timeout: 0,
            }))
            .await
            .unwrap();
        let _ = shutdown_tx.send(());

        let result = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(result.is_ok(), "drain task should exit on shutdown");
    }

    #[tokio::test]
    async fn drain_stops_when_engine_goes_away() {
        let (command_tx, command_rx) = mpsc::channel::<ControllerCommand>(4);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(drain_commands(command_rx, shutdown_rx));

        drop(command_tx);
        let result = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(result.is_ok());
    }
}
