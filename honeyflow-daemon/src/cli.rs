//! Command-line arguments for honeyflow-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Honeyflow SDN honeypot controller.
///
/// Accepts decoded packet-in events from a southbound protocol adapter,
/// classifies their sources and answers with flow rules that forward,
/// load-balance or redirect traffic to a honeypot tier.
#[derive(Parser, Debug)]
#[command(name = "honeyflow-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to honeyflow.toml.
    #[arg(short, long, default_value = "/etc/honeyflow/honeyflow.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut honeyflow_core::config::HoneyflowConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeyflow_core::config::HoneyflowConfig;

    #[test]
    fn defaults_point_at_etc() {
        let cli = DaemonCli::parse_from(["honeyflow-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/honeyflow/honeyflow.toml"));
        assert!(!cli.validate);
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli = DaemonCli::parse_from([
            "honeyflow-daemon",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "/tmp/hf.pid",
        ]);
        let mut config = HoneyflowConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.pid_file, "/tmp/hf.pid");
    }

    #[test]
    fn missing_overrides_keep_config() {
        let cli = DaemonCli::parse_from(["honeyflow-daemon", "-c", "/tmp/x.toml", "--validate"]);
        let mut config = HoneyflowConfig::default();
        cli.apply_overrides(&mut config);

        assert!(cli.validate);
        assert_eq!(config.general.log_level, "info");
    }
}
