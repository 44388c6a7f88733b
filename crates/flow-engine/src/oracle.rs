//! Verdict oracle client and dispatcher.
//!
//! The packet path only ever calls [`OracleHandle::submit`], which enqueues
//! with `try_send` and returns at once. [`OracleWorker`] drains the queue,
//! calls the oracle under a timeout, and merges verdicts into the
//! classifier. A verdict therefore affects only later packets of the source.
//!
//! ```text
//! decision ──submit()──> [bounded queue] ──> OracleWorker ──predict()──> oracle
//!                                                  │
//!                              ClassificationEngine::merge_oracle_verdict
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use honeyflow_core::event::{OracleRequest, OracleResponse};
use honeyflow_core::metrics as m;
use honeyflow_core::types::FiveTuple;

use crate::classifier::{ClassificationEngine, OracleVerdict};
use crate::config::OracleSettings;
use crate::error::FlowEngineError;

/// Source of per-flow verdicts.
pub trait ClassificationOracle: Send + Sync + 'static {
    fn predict(
        &self,
        request: &OracleRequest,
    ) -> impl Future<Output = Result<OracleResponse, FlowEngineError>> + Send;
}

/// Oracle reached over TCP with newline-delimited JSON, one connection per
/// request.
#[derive(Debug, Clone)]
pub struct TcpOracleClient {
    addr: String,
    timeout: Duration,
}

impl TcpOracleClient {
    pub fn new(settings: &OracleSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            timeout: settings.timeout,
        }
    }

    async fn exchange(&self, request: &OracleRequest) -> Result<OracleResponse, FlowEngineError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(FlowEngineError::Oracle(
                "connection closed before a response".to_owned(),
            ));
        }
        Ok(serde_json::from_str(response.trim_end())?)
    }
}

impl ClassificationOracle for TcpOracleClient {
    async fn predict(&self, request: &OracleRequest) -> Result<OracleResponse, FlowEngineError> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(FlowEngineError::OracleTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Non-blocking submission side, cloned into every worker.
#[derive(Clone)]
pub struct OracleHandle {
    tx: mpsc::Sender<OracleRequest>,
    in_flight: Arc<Mutex<HashSet<Ipv4Addr>>>,
    failures: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl OracleHandle {
    /// Queue a request for the flow's source. Returns `false` when one is
    /// already in flight for that source or the queue is full.
    pub fn submit(&self, tuple: &FiveTuple) -> bool {
        if !self.in_flight.lock().insert(tuple.src_ip) {
            return false;
        }
        match self.tx.try_send(OracleRequest::from(tuple)) {
            Ok(()) => true,
            Err(e) => {
                self.in_flight.lock().remove(&tuple.src_ip);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::ORACLE_REQUESTS_TOTAL, m::LABEL_RESULT => "dropped")
                    .increment(1);
                debug!(src = %tuple.src_ip, error = %e, "oracle queue full, request dropped");
                false
            }
        }
    }

    /// Requests that failed or timed out.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Requests dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Background side: calls the oracle and merges verdicts.
pub struct OracleWorker<O: ClassificationOracle> {
    oracle: Arc<O>,
    rx: mpsc::Receiver<OracleRequest>,
    in_flight: Arc<Mutex<HashSet<Ipv4Addr>>>,
    failures: Arc<AtomicU64>,
    classifier: Arc<ClassificationEngine>,
}

/// Create a connected handle and worker.
pub fn oracle_channel<O: ClassificationOracle>(
    oracle: Arc<O>,
    capacity: usize,
    classifier: Arc<ClassificationEngine>,
) -> (OracleHandle, OracleWorker<O>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let failures = Arc::new(AtomicU64::new(0));
    let handle = OracleHandle {
        tx,
        in_flight: Arc::clone(&in_flight),
        failures: Arc::clone(&failures),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let worker = OracleWorker {
        oracle,
        rx,
        in_flight,
        failures,
        classifier,
    };
    (handle, worker)
}

impl<O: ClassificationOracle> OracleWorker<O> {
    /// Process requests until every handle is dropped.
    ///
    /// Each request runs in its own task so a slow oracle never stalls the
    /// queue behind it.
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            let oracle = Arc::clone(&self.oracle);
            let in_flight = Arc::clone(&self.in_flight);
            let failures = Arc::clone(&self.failures);
            let classifier = Arc::clone(&self.classifier);
            tokio::spawn(async move {
                resolve(&*oracle, &request, &classifier, &failures).await;
                in_flight.lock().remove(&request.src_ip);
            });
        }
        debug!("oracle queue closed, worker exiting");
    }
}

async fn resolve<O: ClassificationOracle>(
    oracle: &O,
    request: &OracleRequest,
    classifier: &ClassificationEngine,
    failures: &AtomicU64,
) {
    let started = Instant::now();
    let result = oracle.predict(request).await;
    metrics::histogram!(m::ORACLE_LATENCY_SECONDS).record(started.elapsed().as_secs_f64());

    match result {
        Ok(response) => {
            metrics::counter!(m::ORACLE_REQUESTS_TOTAL, m::LABEL_RESULT => "success").increment(1);
            debug!(
                src = %request.src_ip,
                suspicious = response.is_suspicious,
                confidence = response.confidence,
                "oracle verdict"
            );
            classifier.merge_oracle_verdict(
                request.src_ip,
                OracleVerdict {
                    malicious: response.is_suspicious,
                    confidence: response.confidence,
                },
            );
        }
        Err(e) => {
            failures.fetch_add(1, Ordering::Relaxed);
            let label = match e {
                FlowEngineError::OracleTimeout { .. } => "timeout",
                _ => "failure",
            };
            metrics::counter!(m::ORACLE_REQUESTS_TOTAL, m::LABEL_RESULT => label).increment(1);
            warn!(src = %request.src_ip, error = %e, "oracle request failed, using heuristics only");
        }
    }
}
