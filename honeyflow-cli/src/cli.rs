//! Command-line argument definitions

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use honeyflow_core::event::check_risk_score;
use honeyflow_core::types::ClassificationLevel;

/// Honeyflow -- SDN honeypot redirection controller.
#[derive(Parser, Debug)]
#[command(name = "honeyflow", version, about)]
pub struct Cli {
    /// Path to the honeyflow.toml configuration file.
    #[arg(short, long, global = true, default_value = "/etc/honeyflow/honeyflow.toml")]
    pub config: PathBuf,

    /// Log level for the CLI itself (written to stderr).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate or display the configuration.
    Config(ConfigArgs),
    /// Show whether the daemon is running and which modules it carries.
    Status(StatusArgs),
    /// Query live controller statistics over the control port.
    Stats(StatsArgs),
    /// Submit honeypot feedback for a source address.
    Feedback(FeedbackArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Load and validate the configuration file.
    Validate,
    /// Print the effective configuration (file + environment + defaults).
    Show {
        /// Show only one section (general, southbound, control, engine, ...).
        #[arg(long)]
        section: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Include per-module details.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Connection options shared by commands that talk to the control port.
#[derive(Args, Debug, Clone)]
pub struct ControlArgs {
    /// Control endpoint, overriding `control.bind` from the config.
    #[arg(long)]
    pub addr: Option<String>,

    /// Connect and response timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub control: ControlArgs,
}

#[derive(Args, Debug)]
pub struct FeedbackArgs {
    /// Source address the honeypot observed.
    #[arg(long)]
    pub ip: Ipv4Addr,

    /// Verdict reported by the honeypot.
    #[arg(long, value_parser = parse_level)]
    pub classification: ClassificationLevel,

    /// Risk score, 0-100. Fractions are allowed.
    #[arg(long, default_value_t = 0.0, value_parser = parse_risk_score)]
    pub risk_score: f64,

    /// Model prediction (1 flags the source).
    #[arg(long)]
    pub ml_prediction: Option<u8>,

    /// Honeypot that produced the report.
    #[arg(long)]
    pub honeypot_type: Option<String>,

    #[command(flatten)]
    pub control: ControlArgs,
}

fn parse_level(s: &str) -> Result<ClassificationLevel, String> {
    s.parse().map_err(|e: honeyflow_core::error::ParseError| e.to_string())
}

fn parse_risk_score(s: &str) -> Result<f64, String> {
    let score: f64 = s.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    check_risk_score(score).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_config_validate_with_path() {
        let cli = Cli::try_parse_from(["honeyflow", "-c", "/tmp/h.toml", "config", "validate"])
            .expect("parse succeeded");
        assert_eq!(cli.config, PathBuf::from("/tmp/h.toml"));
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs {
                action: ConfigAction::Validate
            })
        ));
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["honeyflow", "config", "show", "--section", "detection"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Config(ConfigArgs {
                action: ConfigAction::Show { section },
            }) => assert_eq!(section.as_deref(), Some("detection")),
            other => panic!("expected config show, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_default_output_is_text() {
        let cli = Cli::try_parse_from(["honeyflow", "status"]).expect("parse succeeded");
        assert_eq!(cli.output, OutputFormat::Text);
        assert_eq!(cli.config, PathBuf::from("/etc/honeyflow/honeyflow.toml"));
    }

    #[test]
    fn test_cli_global_output_after_subcommand() {
        let cli = Cli::try_parse_from(["honeyflow", "stats", "-o", "json"]).expect("parse succeeded");
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_cli_parse_stats_addr_override() {
        let cli = Cli::try_parse_from(["honeyflow", "stats", "--addr", "10.1.1.1:9000"])
            .expect("parse succeeded");
        let Commands::Stats(args) = cli.command else {
            panic!("expected stats command");
        };
        assert_eq!(args.control.addr.as_deref(), Some("10.1.1.1:9000"));
        assert_eq!(args.control.timeout_ms, 3000);
    }

    #[test]
    fn test_cli_parse_feedback_full() {
        let cli = Cli::try_parse_from([
            "honeyflow",
            "feedback",
            "--ip",
            "10.0.0.66",
            "--classification",
            "Malicious",
            "--risk-score",
            "85",
            "--ml-prediction",
            "1",
            "--honeypot-type",
            "triage",
        ])
        .expect("parse succeeded");
        let Commands::Feedback(args) = cli.command else {
            panic!("expected feedback command");
        };
        assert_eq!(args.ip, Ipv4Addr::new(10, 0, 0, 66));
        assert_eq!(args.classification, ClassificationLevel::Malicious);
        assert_eq!(args.risk_score, 85.0);
        assert_eq!(args.ml_prediction, Some(1));
        assert_eq!(args.honeypot_type.as_deref(), Some("triage"));
    }

    #[test]
    fn test_cli_feedback_accepts_benign_alias() {
        let cli = Cli::try_parse_from([
            "honeyflow",
            "feedback",
            "--ip",
            "10.0.0.66",
            "--classification",
            "benign",
        ])
        .expect("parse succeeded");
        let Commands::Feedback(args) = cli.command else {
            panic!("expected feedback command");
        };
        assert_eq!(args.classification, ClassificationLevel::Normal);
        assert_eq!(args.risk_score, 0.0);
    }

    #[test]
    fn test_cli_feedback_rejects_out_of_range_score() {
        let result = Cli::try_parse_from([
            "honeyflow",
            "feedback",
            "--ip",
            "10.0.0.66",
            "--classification",
            "suspicious",
            "--risk-score",
            "101",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_feedback_accepts_fractional_score() {
        let cli = Cli::try_parse_from([
            "honeyflow",
            "feedback",
            "--ip",
            "10.0.0.66",
            "--classification",
            "suspicious",
            "--risk-score",
            "55.5",
        ])
        .expect("parse succeeded");
        let Commands::Feedback(args) = cli.command else {
            panic!("expected feedback command");
        };
        assert_eq!(args.risk_score, 55.5);
    }

    #[test]
    fn test_cli_feedback_rejects_non_numeric_score() {
        for bad in ["high", "NaN", "-1"] {
            let result = Cli::try_parse_from([
                "honeyflow",
                "feedback",
                "--ip",
                "10.0.0.66",
                "--classification",
                "suspicious",
                "--risk-score",
                bad,
            ]);
            assert!(result.is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_cli_feedback_rejects_unknown_level() {
        let result = Cli::try_parse_from([
            "honeyflow",
            "feedback",
            "--ip",
            "10.0.0.66",
            "--classification",
            "evil",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_feedback_requires_ip() {
        let result = Cli::try_parse_from(["honeyflow", "feedback", "--classification", "malicious"]);
        assert!(result.is_err());
    }
}
