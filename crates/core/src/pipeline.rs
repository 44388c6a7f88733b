//! Pipeline lifecycle traits.
//!
//! Long-running modules (flow engine, southbound listener, control listener)
//! implement [`Pipeline`]. The daemon holds them as `Box<dyn DynPipeline>`,
//! which every `Pipeline` gets through a blanket impl.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::HoneyflowError;

/// Boxed future used by the object-safe [`DynPipeline`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Module health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Running, but with reduced function.
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Start/stop/health lifecycle of a module.
pub trait Pipeline: Send + Sync {
    /// Spawn the module's tasks. Fails if already running.
    fn start(&mut self) -> impl Future<Output = Result<(), HoneyflowError>> + Send;

    /// Stop the module's tasks. Fails if not running.
    fn stop(&mut self) -> impl Future<Output = Result<(), HoneyflowError>> + Send;

    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// Object-safe mirror of [`Pipeline`].
pub trait DynPipeline: Send + Sync {
    fn start(&mut self) -> BoxFuture<'_, Result<(), HoneyflowError>>;

    fn stop(&mut self) -> BoxFuture<'_, Result<(), HoneyflowError>>;

    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

impl<T: Pipeline> DynPipeline for T {
    fn start(&mut self) -> BoxFuture<'_, Result<(), HoneyflowError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), HoneyflowError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}
