//! Flow engine lifecycle.
//!
//! [`FlowEngine`] implements the core [`Pipeline`] trait so the daemon runs it
//! alongside the listeners with the same start/stop/health lifecycle.
//!
//! ```text
//! SouthboundEvent ──mpsc──> N workers ──> FlowDecisionEngine ──> ControllerCommand ──mpsc──> adapter
//! ClassificationFeedback ──mpsc──> feedback loop ──> sticky sets
//!                                  sweep (interval) ──> prune + gauges
//!                                  oracle worker ──> merge verdicts
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use honeyflow_core::error::{HoneyflowError, PipelineError};
use honeyflow_core::event::{ClassificationFeedback, ControllerCommand, SouthboundEvent};
use honeyflow_core::metrics as m;
use honeyflow_core::pipeline::{HealthStatus, Pipeline};
use honeyflow_core::types::ControllerStats;

use crate::config::FlowEngineConfig;
use crate::decision::FlowDecisionEngine;
use crate::error::FlowEngineError;
use crate::oracle::{ClassificationOracle, OracleWorker, TcpOracleClient, oracle_channel};

const DEFAULT_ORACLE_QUEUE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Initialized,
    Running,
    Stopped,
}

pub struct FlowEngine<O: ClassificationOracle = TcpOracleClient> {
    config: FlowEngineConfig,
    state: EngineState,
    decision: Arc<FlowDecisionEngine>,
    event_rx: Option<mpsc::Receiver<SouthboundEvent>>,
    feedback_rx: Option<mpsc::Receiver<ClassificationFeedback>>,
    command_tx: mpsc::Sender<ControllerCommand>,
    oracle_worker: Option<OracleWorker<O>>,
    tasks: Vec<JoinHandle<()>>,
    events_processed: Arc<AtomicU64>,
    commands_dropped: Arc<AtomicU64>,
    /// `commands_dropped` as of the previous health check.
    dropped_seen: AtomicU64,
}

impl<O: ClassificationOracle> FlowEngine<O> {
    pub fn state_name(&self) -> &str {
        match self.state {
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn commands_dropped(&self) -> u64 {
        self.commands_dropped.load(Ordering::Relaxed)
    }

    /// Shared decision engine, for stats queries and direct feedback.
    pub fn decision_engine(&self) -> Arc<FlowDecisionEngine> {
        Arc::clone(&self.decision)
    }

    pub fn stats(&self) -> ControllerStats {
        self.decision.stats()
    }

    fn spawn_workers(&mut self, event_rx: mpsc::Receiver<SouthboundEvent>) {
        let shared_rx = Arc::new(Mutex::new(event_rx));
        for worker_id in 0..self.config.workers {
            let rx = Arc::clone(&shared_rx);
            let decision = Arc::clone(&self.decision);
            let command_tx = self.command_tx.clone();
            let processed = Arc::clone(&self.events_processed);
            let dropped = Arc::clone(&self.commands_dropped);

            self.tasks.push(tokio::spawn(async move {
                loop {
                    // hold the receiver only while waiting
                    let event = rx.lock().await.recv().await;
                    let Some(event) = event else {
                        debug!(worker_id, "event channel closed, worker exiting");
                        break;
                    };
                    processed.fetch_add(1, Ordering::Relaxed);
                    for command in handle_event(&decision, event) {
                        send_command(&command_tx, command, &dropped);
                    }
                }
            }));
        }
    }

    fn spawn_feedback_loop(&mut self, mut feedback_rx: mpsc::Receiver<ClassificationFeedback>) {
        let decision = Arc::clone(&self.decision);
        self.tasks.push(tokio::spawn(async move {
            while let Some(feedback) = feedback_rx.recv().await {
                if let Err(e) = feedback.validate() {
                    warn!(src = %feedback.source_ip, error = %e, "feedback rejected");
                    continue;
                }
                let level = decision.apply_feedback(&feedback);
                info!(
                    src = %feedback.source_ip,
                    label = %feedback.classification,
                    risk_score = feedback.risk_score,
                    result = %level,
                    "classification feedback received"
                );
            }
            debug!("feedback channel closed");
        }));
    }

    fn spawn_sweep(&mut self) {
        let decision = Arc::clone(&self.decision);
        let period = self.config.sweep_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = decision.sweep(Instant::now());
                let stats = decision.stats();

                metrics::gauge!(m::FLOW_ENGINE_ACTIVE_SOURCES).set(stats.active_sources.len() as f64);
                metrics::gauge!(m::FLOW_ENGINE_SUSPICIOUS_IPS).set(stats.suspicious_ips.len() as f64);
                metrics::gauge!(m::FLOW_ENGINE_MALICIOUS_IPS).set(stats.malicious_ips.len() as f64);
                metrics::gauge!(m::FLOW_ENGINE_INSTALLED_FLOWS).set(stats.installed_flows as f64);

                info!(
                    active_sources = stats.active_sources.len(),
                    suspicious = stats.suspicious_ips.len(),
                    malicious = stats.malicious_ips.len(),
                    installed_flows = stats.installed_flows,
                    learned_macs = stats.learned_macs,
                    packets = stats.packets_processed,
                    idle_sources_removed = report.idle_sources,
                    flows_expired = report.expired_flows,
                    stale_assignments = report.stale_assignments,
                    verdicts_expired = report.expired_verdicts,
                    "sweep"
                );
            }
        }));
    }
}

/// Route one southbound event to its intake function.
pub fn handle_event(decision: &FlowDecisionEngine, event: SouthboundEvent) -> Vec<ControllerCommand> {
    match event {
        SouthboundEvent::SwitchConnected { switch_id } => {
            decision.on_switch_connected(switch_id, Instant::now())
        }
        SouthboundEvent::SwitchDisconnected { switch_id } => {
            decision.on_switch_disconnected(switch_id);
            Vec::new()
        }
        SouthboundEvent::PacketIn(packet) => {
            let started = Instant::now();
            let decision = decision.on_packet_in(&packet, started);
            metrics::histogram!(m::FLOW_ENGINE_PROCESSING_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            decision.commands
        }
    }
}

fn send_command(
    tx: &mpsc::Sender<ControllerCommand>,
    command: ControllerCommand,
    dropped: &AtomicU64,
) {
    if let Err(e) = tx.try_send(command) {
        dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::FLOW_ENGINE_COMMANDS_DROPPED_TOTAL).increment(1);
        warn!(error = %e, "controller command dropped");
    }
}

impl<O: ClassificationOracle> Pipeline for FlowEngine<O> {
    async fn start(&mut self) -> Result<(), HoneyflowError> {
        if self.state == EngineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let event_rx = self.event_rx.take().ok_or_else(|| {
            HoneyflowError::Pipeline(PipelineError::InitFailed(
                "event receiver not available (consumed by a previous start? rebuild the engine to restart)"
                    .to_owned(),
            ))
        })?;

        info!(
            workers = self.config.workers,
            load_balancer = self.config.balancer.is_some(),
            oracle = self.oracle_worker.is_some(),
            "starting flow engine"
        );

        self.spawn_workers(event_rx);
        if let Some(feedback_rx) = self.feedback_rx.take() {
            self.spawn_feedback_loop(feedback_rx);
        }
        self.spawn_sweep();
        if let Some(worker) = self.oracle_worker.take() {
            self.tasks.push(tokio::spawn(worker.run()));
        }

        self.state = EngineState::Running;
        info!("flow engine started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HoneyflowError> {
        if self.state != EngineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping flow engine");
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = EngineState::Stopped;
        info!(
            events = self.events_processed(),
            commands_dropped = self.commands_dropped(),
            "flow engine stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EngineState::Running => {
                let dropped = self.commands_dropped.load(Ordering::Relaxed);
                let seen = self.dropped_seen.swap(dropped, Ordering::Relaxed);
                if dropped > seen {
                    HealthStatus::Degraded(format!(
                        "{} controller commands dropped since last check",
                        dropped - seen
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            EngineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// Builds a [`FlowEngine`] and its command channel.
pub struct FlowEngineBuilder<O: ClassificationOracle = TcpOracleClient> {
    config: FlowEngineConfig,
    event_rx: Option<mpsc::Receiver<SouthboundEvent>>,
    feedback_rx: Option<mpsc::Receiver<ClassificationFeedback>>,
    command_tx: Option<mpsc::Sender<ControllerCommand>>,
    command_channel_capacity: usize,
    oracle: Option<O>,
}

impl<O: ClassificationOracle> FlowEngineBuilder<O> {
    pub fn new() -> Self {
        Self {
            config: FlowEngineConfig::default(),
            event_rx: None,
            feedback_rx: None,
            command_tx: None,
            command_channel_capacity: 4096,
            oracle: None,
        }
    }

    pub fn config(mut self, config: FlowEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Southbound events from the adapter.
    pub fn event_receiver(mut self, rx: mpsc::Receiver<SouthboundEvent>) -> Self {
        self.event_rx = Some(rx);
        self
    }

    /// Honeypot feedback from the control listener.
    pub fn feedback_receiver(mut self, rx: mpsc::Receiver<ClassificationFeedback>) -> Self {
        self.feedback_rx = Some(rx);
        self
    }

    /// Send commands into an existing channel. Without it the builder
    /// creates one and returns its receiver.
    pub fn command_sender(mut self, tx: mpsc::Sender<ControllerCommand>) -> Self {
        self.command_tx = Some(tx);
        self
    }

    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub fn oracle(mut self, oracle: O) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn build(
        self,
    ) -> Result<(FlowEngine<O>, Option<mpsc::Receiver<ControllerCommand>>), FlowEngineError> {
        if self.config.workers == 0 {
            return Err(FlowEngineError::config("engine.workers", "must be at least 1"));
        }
        if self.config.sweep_interval.is_zero() {
            return Err(FlowEngineError::config(
                "engine.sweep_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.command_tx.is_none() && self.command_channel_capacity == 0 {
            return Err(FlowEngineError::config(
                "command_channel_capacity",
                "must be greater than 0",
            ));
        }

        let (command_tx, command_rx) = match self.command_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.command_channel_capacity);
                (tx, Some(rx))
            }
        };

        let mut decision = FlowDecisionEngine::new(&self.config);
        let oracle_worker = self.oracle.map(|oracle| {
            let capacity = self
                .config
                .oracle
                .as_ref()
                .map_or(DEFAULT_ORACLE_QUEUE, |o| o.queue_capacity);
            let (handle, worker) =
                oracle_channel(Arc::new(oracle), capacity, Arc::clone(decision.classifier()));
            decision.set_oracle(handle);
            worker
        });

        let engine = FlowEngine {
            config: self.config,
            state: EngineState::Initialized,
            decision: Arc::new(decision),
            event_rx: self.event_rx,
            feedback_rx: self.feedback_rx,
            command_tx,
            oracle_worker,
            tasks: Vec::new(),
            events_processed: Arc::new(AtomicU64::new(0)),
            commands_dropped: Arc::new(AtomicU64::new(0)),
            dropped_seen: AtomicU64::new(0),
        };

        Ok((engine, command_rx))
    }
}

impl<O: ClassificationOracle> Default for FlowEngineBuilder<O> {
    fn default() -> Self {
        Self::new()
    }
}
