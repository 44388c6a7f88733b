//! `honeyflow feedback` command handler

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{ClassificationFeedback, ControlRequest, ControlResponse};
use honeyflow_core::types::ClassificationLevel;

use crate::cli::FeedbackArgs;
use crate::client::ControlClient;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

pub async fn execute(
    args: FeedbackArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = HoneyflowConfig::load(config_path).await?;
    let client = super::control_client(&args.control, &config);
    let report = submit(&client, feedback_from_args(&args)).await?;
    writer.render(&report)
}

pub fn feedback_from_args(args: &FeedbackArgs) -> ClassificationFeedback {
    let mut feedback = ClassificationFeedback::new(args.ip, args.classification, args.risk_score);
    feedback.ml_prediction = args.ml_prediction;
    feedback.honeypot_type = args.honeypot_type.clone();
    feedback
}

/// Send one feedback record and require an acknowledgement for the same
/// source address.
pub async fn submit(
    client: &ControlClient,
    feedback: ClassificationFeedback,
) -> Result<FeedbackReport, CliError> {
    let source_ip = feedback.source_ip;
    let classification = feedback.classification;
    let risk_score = feedback.risk_score;
    info!(%source_ip, %classification, risk_score, "submitting feedback");

    match client.send(&ControlRequest::Feedback(feedback)).await? {
        ControlResponse::Ack { source_ip: acked } if acked == source_ip => Ok(FeedbackReport {
            source_ip,
            classification,
            risk_score,
            accepted: true,
        }),
        ControlResponse::Error { message } => Err(CliError::Rejected(message)),
        other => Err(CliError::Rejected(format!(
            "unexpected response to feedback for {source_ip}: {other:?}"
        ))),
    }
}

#[derive(Serialize)]
pub struct FeedbackReport {
    pub source_ip: Ipv4Addr,
    pub classification: ClassificationLevel,
    pub risk_score: f64,
    pub accepted: bool,
}

impl Render for FeedbackReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Feedback for {} ({}, risk {}): {}",
            self.source_ip.to_string().bold(),
            self.classification,
            self.risk_score,
            "accepted".green()
        )
    }
}
