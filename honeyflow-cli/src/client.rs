//! Line-delimited JSON client for the daemon's control port.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use honeyflow_core::event::{ControlRequest, ControlResponse};

use crate::error::CliError;

/// One request, one response line. Each call opens a fresh connection.
pub struct ControlClient {
    addr: String,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `request` and wait for the daemon's answer.
    ///
    /// Connection failures and timeouts map to
    /// [`CliError::DaemonUnavailable`]; a `ControlResponse::Error` is
    /// returned as-is for the caller to interpret.
    pub async fn send(&self, request: &ControlRequest) -> Result<ControlResponse, CliError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| self.unavailable("connect timed out"))?
            .map_err(|e| self.unavailable(&e.to_string()))?;
        debug!(addr = %self.addr, "connected to control port");

        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&line).await?;

        let mut lines = BufReader::new(read_half).lines();
        let reply = tokio::time::timeout(self.timeout, lines.next_line())
            .await
            .map_err(|_| self.unavailable("no response before timeout"))??
            .ok_or_else(|| self.unavailable("connection closed without a response"))?;

        Ok(serde_json::from_str(&reply)?)
    }

    fn unavailable(&self, reason: &str) -> CliError {
        CliError::DaemonUnavailable(format!("{}: {reason}", self.addr))
    }
}
