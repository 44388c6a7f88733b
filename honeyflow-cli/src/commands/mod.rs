//! Command handlers -- one module per subcommand

pub mod config;
pub mod feedback;
pub mod stats;
pub mod status;

use std::time::Duration;

use honeyflow_core::config::HoneyflowConfig;

use crate::cli::ControlArgs;
use crate::client::ControlClient;

/// Control client for `--addr` if given, otherwise `control.bind`.
pub(crate) fn control_client(args: &ControlArgs, config: &HoneyflowConfig) -> ControlClient {
    let addr = args
        .addr
        .clone()
        .unwrap_or_else(|| config.control.bind.clone());
    ControlClient::new(addr, Duration::from_millis(args.timeout_ms))
}
