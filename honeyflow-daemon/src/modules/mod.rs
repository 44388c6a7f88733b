//! Module registry and initialization.
//!
//! Each long-running part of the daemon (flow engine, southbound listener,
//! control listener) is wrapped in a [`ModuleHandle`] and driven through
//! the object-safe [`DynPipeline`] trait.

pub mod control;
pub mod flow_engine;
pub mod southbound;

use honeyflow_core::pipeline::{DynPipeline, HealthStatus};

/// A registered module.
pub struct ModuleHandle {
    /// Name used in logs and health reports.
    pub name: String,
    pub enabled: bool,
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    pub fn new(name: impl Into<String>, enabled: bool, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            enabled,
            pipeline,
        }
    }

    /// Disabled modules always report `Healthy`.
    pub async fn health_check(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::Healthy;
        }
        self.pipeline.health_check().await
    }
}

/// Modules in start order. The engine is registered first so its workers
/// are draining the event channel before any adapter connects.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Start enabled modules in registration order.
    ///
    /// Stops at the first failure. Modules already started are left running;
    /// the caller decides whether to `stop_all`.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        for handle in &mut self.modules {
            if !handle.enabled {
                tracing::debug!(module = %handle.name, "skipping disabled module");
                continue;
            }

            tracing::info!(module = %handle.name, "starting module");
            handle
                .pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start module '{}': {}", handle.name, e))?;
        }
        Ok(())
    }

    /// Stop enabled modules in reverse registration order.
    ///
    /// Listeners go first so nothing new reaches the engine. Errors are
    /// collected and the remaining modules are still stopped. Modules that
    /// were never started are skipped.
    pub async fn stop_all(&mut self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for handle in self.modules.iter_mut().rev() {
            if !handle.enabled {
                continue;
            }

            tracing::info!(module = %handle.name, "stopping module");
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped"),
                Err(honeyflow_core::HoneyflowError::Pipeline(
                    honeyflow_core::PipelineError::NotRunning,
                )) => {
                    tracing::debug!(module = %handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(module = %handle.name, error = %e, "failed to stop module");
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "errors stopping modules: {}",
                errors.join("; ")
            ));
        }
        Ok(())
    }

    /// `(name, enabled, status)` for every module.
    pub async fn health_statuses(&self) -> Vec<(String, bool, HealthStatus)> {
        let mut statuses = Vec::with_capacity(self.modules.len());
        for handle in &self.modules {
            let status = handle.health_check().await;
            statuses.push((handle.name.clone(), handle.enabled, status));
        }
        statuses
    }

    pub fn count(&self) -> usize {
        self.modules.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }
}

/// Lifecycle of the TCP listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerState {
    Initialized,
    Running,
    Stopped,
}

impl ListenerState {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    pub(crate) fn health(self) -> HealthStatus {
        match self {
            Self::Running => HealthStatus::Healthy,
            Self::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            Self::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}
