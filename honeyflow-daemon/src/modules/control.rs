//! Control listener: honeypot feedback and stats queries.
//!
//! One JSON [`ControlRequest`] per line, one [`ControlResponse`] per line
//! back. Feedback is queued for the flow engine and acknowledged; stats
//! are read straight from the shared decision engine.
//!
//! ```text
//! {"type":"feedback","source_ip":"10.0.0.77","classification":"malicious","risk_score":95}
//! {"type":"ack","source_ip":"10.0.0.77"}
//! {"type":"stats"}
//! {"type":"stats","active_sources":[...],...}
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::error::{HoneyflowError, PipelineError};
use honeyflow_core::event::{ClassificationFeedback, ControlRequest, ControlResponse};
use honeyflow_core::metrics as m;
use honeyflow_core::pipeline::{HealthStatus, Pipeline};
use honeyflow_flow_engine::FlowDecisionEngine;

use super::{ListenerState, ModuleHandle};

pub const MODULE_NAME: &str = honeyflow_core::event::MODULE_CONTROL;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Answer one request line.
pub async fn handle_request(
    line: &str,
    decision: &FlowDecisionEngine,
    feedback_tx: &mpsc::Sender<ClassificationFeedback>,
) -> ControlResponse {
    let (response, result) = match serde_json::from_str::<ControlRequest>(line) {
        Ok(ControlRequest::Feedback(feedback)) => {
            let source_ip = feedback.source_ip;
            match feedback_tx.send(feedback).await {
                Ok(()) => (ControlResponse::Ack { source_ip }, "ack"),
                Err(_) => (
                    ControlResponse::Error {
                        message: "flow engine is not accepting feedback".to_owned(),
                    },
                    "error",
                ),
            }
        }
        Ok(ControlRequest::Stats) => (ControlResponse::Stats(decision.stats()), "stats"),
        Err(e) => (
            ControlResponse::Error {
                message: format!("invalid request: {e}"),
            },
            "error",
        ),
    };
    metrics::counter!(m::CONTROL_REQUESTS_TOTAL, m::LABEL_RESULT => result).increment(1);
    response
}

/// TCP listener for control requests.
pub struct ControlListener {
    bind: String,
    max_connections: usize,
    decision: Arc<FlowDecisionEngine>,
    feedback_tx: mpsc::Sender<ClassificationFeedback>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    state: ListenerState,
}

impl ControlListener {
    pub fn new(
        bind: impl Into<String>,
        max_connections: usize,
        decision: Arc<FlowDecisionEngine>,
        feedback_tx: mpsc::Sender<ClassificationFeedback>,
    ) -> Self {
        Self {
            bind: bind.into(),
            max_connections,
            decision,
            feedback_tx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            local_addr: None,
            state: ListenerState::Initialized,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Pipeline for ControlListener {
    async fn start(&mut self) -> Result<(), HoneyflowError> {
        if self.state == ListenerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::InitFailed(
                "control listener was stopped; rebuild it to restart".to_owned(),
            )
            .into());
        }

        let listener = TcpListener::bind(&self.bind).await.map_err(|e| {
            HoneyflowError::Pipeline(PipelineError::InitFailed(format!(
                "failed to bind control listener on {}: {}",
                self.bind, e
            )))
        })?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let decision = Arc::clone(&self.decision);
        let feedback_tx = self.feedback_tx.clone();
        let cancel = self.cancel.clone();

        self.tasks.push(tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "control accept failed");
                        continue;
                    }
                };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    warn!(%peer, "max control connections reached, rejecting");
                    continue;
                };

                let decision = Arc::clone(&decision);
                let feedback_tx = feedback_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    serve_client(stream, peer, &decision, &feedback_tx, cancel).await;
                    drop(permit);
                });
            }
        }));

        self.state = ListenerState::Running;
        info!(listen_addr = %local_addr, "control listener started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HoneyflowError> {
        if self.state != ListenerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = ListenerState::Stopped;
        info!("control listener stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        self.state.health()
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    decision: &FlowDecisionEngine,
    feedback_tx: &mpsc::Sender<ClassificationFeedback>,
    cancel: CancellationToken,
) {
    debug!(%peer, "control client connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };
        let response = match read {
            Ok(0) => break,
            Ok(_) if line.len() > MAX_REQUEST_BYTES => {
                warn!(%peer, bytes = line.len(), "control request too long, closing");
                break;
            }
            Ok(_) if line.trim().is_empty() => continue,
            Ok(_) => handle_request(line.trim(), decision, feedback_tx).await,
            Err(e) => {
                debug!(%peer, error = %e, "control read failed");
                break;
            }
        };

        let mut out = match serde_json::to_vec(&response) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "failed to encode control response");
                break;
            }
        };
        out.push(b'\n');
        if let Err(e) = write_half.write_all(&out).await {
            debug!(%peer, error = %e, "control write failed");
            break;
        }
    }
    debug!(%peer, "control client disconnected");
}

/// Build the control listener. `None` when disabled.
pub fn init(
    config: &HoneyflowConfig,
    decision: Arc<FlowDecisionEngine>,
    feedback_tx: mpsc::Sender<ClassificationFeedback>,
) -> Option<ModuleHandle> {
    if !config.control.enabled {
        info!("control listener disabled in configuration");
        return None;
    }
    let listener = ControlListener::new(
        config.control.bind.clone(),
        config.control.max_connections,
        decision,
        feedback_tx,
    );
    Some(ModuleHandle::new(MODULE_NAME, true, Box::new(listener)))
}
