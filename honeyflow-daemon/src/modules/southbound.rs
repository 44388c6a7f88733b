//! Southbound adapter listener.
//!
//! A protocol adapter (the piece that speaks OpenFlow to the switches)
//! connects over TCP and exchanges newline-delimited JSON:
//!
//! ```text
//! adapter --SouthboundEvent line--> listener --> event_tx --> FlowEngine
//! FlowEngine --> command_rx --> CommandRouter --> connection writer --ControllerCommand line--> adapter
//! ```
//!
//! Any event from a connection binds its switch to that connection.
//! When the connection closes, every switch it carried is reported as
//! disconnected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::error::{HoneyflowError, PipelineError};
use honeyflow_core::event::{ControllerCommand, SouthboundEvent};
use honeyflow_core::metrics as m;
use honeyflow_core::pipeline::{HealthStatus, Pipeline};
use honeyflow_core::types::SwitchId;

use super::{ListenerState, ModuleHandle};

pub const MODULE_NAME: &str = honeyflow_core::event::MODULE_SOUTHBOUND;

/// Commands buffered per adapter connection.
const CONNECTION_QUEUE: usize = 1024;

/// Longest accepted event line. A packet-in carries at most one frame.
const MAX_LINE_BYTES: usize = 256 * 1024;

/// Result of handing a command to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// No connection carries this switch.
    UnknownSwitch,
    /// The connection's queue is full.
    QueueFull,
    /// The connection is gone but has not been unbound yet.
    Closed,
}

struct Route {
    conn_id: Uuid,
    tx: mpsc::Sender<ControllerCommand>,
}

/// Maps each switch to the adapter connection that reported it.
#[derive(Default)]
pub struct CommandRouter {
    routes: RwLock<HashMap<SwitchId, Route>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `switch_id` to a connection. Returns `true` when the binding is
    /// new or moved from another connection.
    pub fn bind(
        &self,
        switch_id: SwitchId,
        conn_id: Uuid,
        tx: &mpsc::Sender<ControllerCommand>,
    ) -> bool {
        if self
            .routes
            .read()
            .get(&switch_id)
            .is_some_and(|r| r.conn_id == conn_id)
        {
            return false;
        }

        let previous = self.routes.write().insert(
            switch_id,
            Route {
                conn_id,
                tx: tx.clone(),
            },
        );
        if let Some(previous) = previous
            && previous.conn_id != conn_id
        {
            info!(
                switch_id,
                from = %previous.conn_id,
                to = %conn_id,
                "switch moved to another adapter connection"
            );
        }
        true
    }

    /// Drop the binding if it still belongs to `conn_id`.
    pub fn unbind(&self, switch_id: SwitchId, conn_id: Uuid) -> bool {
        let mut routes = self.routes.write();
        if routes.get(&switch_id).is_some_and(|r| r.conn_id == conn_id) {
            routes.remove(&switch_id);
            true
        } else {
            false
        }
    }

    /// Drop every binding of a connection and return the switches it held.
    pub fn unbind_connection(&self, conn_id: Uuid) -> Vec<SwitchId> {
        let mut routes = self.routes.write();
        let mut switches: Vec<SwitchId> = routes
            .iter()
            .filter(|(_, r)| r.conn_id == conn_id)
            .map(|(sw, _)| *sw)
            .collect();
        for sw in &switches {
            routes.remove(sw);
        }
        switches.sort_unstable();
        switches
    }

    pub fn route(&self, command: ControllerCommand) -> RouteOutcome {
        let routes = self.routes.read();
        let Some(route) = routes.get(&command.switch_id()) else {
            return RouteOutcome::UnknownSwitch;
        };
        match route.tx.try_send(command) {
            Ok(()) => RouteOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => RouteOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => RouteOutcome::Closed,
        }
    }

    /// Switches with a live binding, sorted.
    pub fn switches(&self) -> Vec<SwitchId> {
        let mut switches: Vec<SwitchId> = self.routes.read().keys().copied().collect();
        switches.sort_unstable();
        switches
    }
}

/// TCP listener for southbound adapters.
pub struct SouthboundListener {
    bind: String,
    max_connections: usize,
    event_tx: mpsc::Sender<SouthboundEvent>,
    command_rx: Option<mpsc::Receiver<ControllerCommand>>,
    router: Arc<CommandRouter>,
    connections: Arc<AtomicUsize>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    state: ListenerState,
}

impl SouthboundListener {
    pub fn new(
        bind: impl Into<String>,
        max_connections: usize,
        event_tx: mpsc::Sender<SouthboundEvent>,
        command_rx: mpsc::Receiver<ControllerCommand>,
    ) -> Self {
        Self {
            bind: bind.into(),
            max_connections,
            event_tx,
            command_rx: Some(command_rx),
            router: Arc::new(CommandRouter::new()),
            connections: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            local_addr: None,
            state: ListenerState::Initialized,
        }
    }

    /// Bound address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn router(&self) -> Arc<CommandRouter> {
        Arc::clone(&self.router)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Pipeline for SouthboundListener {
    async fn start(&mut self) -> Result<(), HoneyflowError> {
        if self.state == ListenerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let listener = TcpListener::bind(&self.bind).await.map_err(|e| {
            HoneyflowError::Pipeline(PipelineError::InitFailed(format!(
                "failed to bind southbound listener on {}: {}",
                self.bind, e
            )))
        })?;
        let local_addr = listener.local_addr()?;

        let command_rx = self.command_rx.take().ok_or_else(|| {
            HoneyflowError::Pipeline(PipelineError::InitFailed(
                "command receiver already consumed; rebuild the listener to restart".to_owned(),
            ))
        })?;
        self.local_addr = Some(local_addr);

        self.tasks.push(tokio::spawn(dispatch_commands(
            command_rx,
            Arc::clone(&self.router),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(accept_loop(
            listener,
            Arc::new(Semaphore::new(self.max_connections)),
            self.event_tx.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.connections),
            self.cancel.clone(),
        )));

        self.state = ListenerState::Running;
        info!(listen_addr = %local_addr, "southbound listener started");
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
        info!("southbound listener stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        self.state.health()
    }
}

async fn dispatch_commands(
    mut command_rx: mpsc::Receiver<ControllerCommand>,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = command_rx.recv() => command,
        };
        let Some(command) = command else {
            debug!("command channel closed");
            break;
        };

        let switch_id = command.switch_id();
        let kind = command.kind();
        match router.route(command) {
            RouteOutcome::Delivered => {}
            RouteOutcome::UnknownSwitch => {
                debug!(switch_id, kind, "no adapter carries switch, command discarded");
            }
            RouteOutcome::QueueFull | RouteOutcome::Closed => {
                metrics::counter!(m::FLOW_ENGINE_COMMANDS_DROPPED_TOTAL).increment(1);
                warn!(switch_id, kind, "adapter connection not accepting commands, dropped");
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    event_tx: mpsc::Sender<SouthboundEvent>,
    router: Arc<CommandRouter>,
    connections: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "southbound accept failed");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
            warn!(%peer, "max southbound connections reached, rejecting");
            continue;
        };

        let event_tx = event_tx.clone();
        let router = Arc::clone(&router);
        let connections = Arc::clone(&connections);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let open = connections.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::gauge!(m::SOUTHBOUND_CONNECTIONS).set(open as f64);

            serve_adapter(stream, peer, event_tx, router, cancel).await;

            let open = connections.fetch_sub(1, Ordering::Relaxed) - 1;
            metrics::gauge!(m::SOUTHBOUND_CONNECTIONS).set(open as f64);
            drop(permit);
        });
    }
}

async fn serve_adapter(
    stream: TcpStream,
    peer: SocketAddr,
    event_tx: mpsc::Sender<SouthboundEvent>,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) {
    let conn_id = Uuid::new_v4();
    info!(%peer, %conn_id, "southbound adapter connected");

    let (read_half, mut write_half) = stream.into_split();
    let (command_tx, mut command_rx) = mpsc::channel::<ControllerCommand>(CONNECTION_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let mut line = match serde_json::to_vec(&command) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode controller command");
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = write_half.write_all(&line).await {
                debug!(error = %e, "adapter write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) if line.len() > MAX_LINE_BYTES => {
                warn!(%peer, bytes = line.len(), "event line too long, closing connection");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event = match serde_json::from_str::<SouthboundEvent>(trimmed) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(%peer, error = %e, "malformed southbound event");
                        continue;
                    }
                };

                match &event {
                    SouthboundEvent::SwitchDisconnected { switch_id } => {
                        router.unbind(*switch_id, conn_id);
                    }
                    other => {
                        if router.bind(other.switch_id(), conn_id, &command_tx) {
                            debug!(switch_id = other.switch_id(), %conn_id, "switch bound");
                        }
                    }
                }

                if event_tx.send(event).await.is_err() {
                    debug!("event channel closed, dropping adapter");
                    break;
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "adapter read failed");
                break;
            }
        }
    }

    for switch_id in router.unbind_connection(conn_id) {
        let _ = event_tx
            .send(SouthboundEvent::SwitchDisconnected { switch_id })
            .await;
    }
    drop(command_tx);
    let _ = writer.await;
    info!(%peer, %conn_id, "southbound adapter disconnected");
}

/// Build the southbound listener. `None` when disabled.
pub fn init(
    config: &HoneyflowConfig,
    event_tx: mpsc::Sender<SouthboundEvent>,
    command_rx: mpsc::Receiver<ControllerCommand>,
) -> Option<ModuleHandle> {
    if !config.southbound.enabled {
        info!("southbound listener disabled in configuration");
        return None;
    }
    let listener = SouthboundListener::new(
        config.southbound.bind.clone(),
        config.southbound.max_connections,
        event_tx,
        command_rx,
    );
    Some(ModuleHandle::new(MODULE_NAME, true, Box::new(listener)))
}
