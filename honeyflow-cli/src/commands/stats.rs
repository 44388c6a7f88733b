//! `honeyflow stats` command handler

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Serialize;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{ControlRequest, ControlResponse};
use honeyflow_core::types::ControllerStats;

use crate::cli::StatsArgs;
use crate::client::ControlClient;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

pub async fn execute(
    args: StatsArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = HoneyflowConfig::load(config_path).await?;
    let client = super::control_client(&args.control, &config);
    let report = fetch(&client).await?;
    writer.render(&report)
}

pub async fn fetch(client: &ControlClient) -> Result<StatsReport, CliError> {
    match client.send(&ControlRequest::Stats).await? {
        ControlResponse::Stats(stats) => Ok(StatsReport {
            endpoint: client.addr().to_owned(),
            stats,
        }),
        ControlResponse::Error { message } => Err(CliError::Rejected(message)),
        other => Err(CliError::Rejected(format!(
            "unexpected response to stats request: {other:?}"
        ))),
    }
}

#[derive(Serialize)]
pub struct StatsReport {
    pub endpoint: String,
    #[serde(flatten)]
    pub stats: ControllerStats,
}

impl Render for StatsReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let s = &self.stats;
        writeln!(w, "Controller statistics ({})", self.endpoint.bold())?;
        writeln!(w)?;
        writeln!(w, "  {:<18} {}", "packets processed", s.packets_processed)?;
        writeln!(w, "  {:<18} {}", "installed flows", s.installed_flows)?;
        writeln!(w, "  {:<18} {}", "learned macs", s.learned_macs)?;
        writeln!(w, "  {:<18} {}", "redirects", s.redirects)?;
        writeln!(w, "  {:<18} {}", "load balanced", s.load_balanced)?;
        writeln!(w, "  {:<18} {}", "proxy arp replies", s.proxy_arp_replies)?;
        writeln!(w, "  {:<18} {}", "oracle failures", s.oracle_failures)?;
        writeln!(w)?;
        writeln!(w, "  {:<18} {}", "active sources", ip_list(&s.active_sources))?;
        writeln!(
            w,
            "  {:<18} {}",
            "suspicious".yellow(),
            ip_list(&s.suspicious_ips)
        )?;
        writeln!(w, "  {:<18} {}", "malicious".red(), ip_list(&s.malicious_ips))
    }
}

fn ip_list(ips: &[Ipv4Addr]) -> String {
    if ips.is_empty() {
        return "-".to_owned();
    }
    ips.iter()
        .map(Ipv4Addr::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
