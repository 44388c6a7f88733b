//! Flow engine module initialization.
//!
//! Converts the core config into a `FlowEngineConfig`, attaches the TCP
//! oracle client when `[oracle]` is enabled, and wires the channels:
//!
//! ```text
//! southbound --SouthboundEvent--> event_rx --> FlowEngine
//! control --ClassificationFeedback--> feedback_rx --> FlowEngine
//! FlowEngine --ControllerCommand--> command_tx --> southbound
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{ClassificationFeedback, ControllerCommand, SouthboundEvent};
use honeyflow_flow_engine::{
    FlowDecisionEngine, FlowEngineBuilder, FlowEngineConfig, TcpOracleClient,
};

use super::ModuleHandle;

pub const MODULE_NAME: &str = honeyflow_core::event::MODULE_FLOW_ENGINE;

/// Build the flow engine.
///
/// Returns the module handle plus the shared decision engine, which the
/// control listener reads stats from.
pub fn init(
    config: &HoneyflowConfig,
    event_rx: mpsc::Receiver<SouthboundEvent>,
    feedback_rx: mpsc::Receiver<ClassificationFeedback>,
    command_tx: mpsc::Sender<ControllerCommand>,
) -> Result<(ModuleHandle, Arc<FlowDecisionEngine>)> {
    let engine_config = FlowEngineConfig::from_core(config)
        .map_err(|e| anyhow::anyhow!("invalid flow engine config: {}", e))?;

    tracing::info!(
        workers = engine_config.workers,
        load_balancer = engine_config.balancer.is_some(),
        oracle = engine_config.oracle.is_some(),
        static_hosts = engine_config.static_hosts.len(),
        "initializing flow engine"
    );

    let oracle = engine_config.oracle.as_ref().map(TcpOracleClient::new);

    let mut builder = FlowEngineBuilder::<TcpOracleClient>::new()
        .config(engine_config)
        .event_receiver(event_rx)
        .feedback_receiver(feedback_rx)
        .command_sender(command_tx);
    if let Some(oracle) = oracle {
        builder = builder.oracle(oracle);
    }

    let (engine, _) = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build flow engine: {}", e))?;

    let decision = engine.decision_engine();
    let handle = ModuleHandle::new(MODULE_NAME, true, Box::new(engine));
    Ok((handle, decision))
}
