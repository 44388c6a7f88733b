//! `honeyflow config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use honeyflow_core::config::HoneyflowConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const SECTIONS: &[&str] = &[
    "general",
    "southbound",
    "control",
    "engine",
    "detection",
    "classification",
    "load_balancer",
    "honeypots",
    "forwarding",
    "topology",
    "oracle",
    "metrics",
];

pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => {
            let report = validate(config_path).await;
            writer.render(&report)?;
            if !report.valid {
                return Err(CliError::Config("configuration is invalid".to_owned()));
            }
            Ok(())
        }
        ConfigAction::Show { section } => {
            let report = show(config_path, section.as_deref()).await?;
            writer.render(&report)
        }
    }
}

/// Load the file with environment overrides and run validation.
pub async fn validate(config_path: &Path) -> ConfigValidationReport {
    info!(path = %config_path.display(), "validating configuration");

    let errors = match HoneyflowConfig::load(config_path).await {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.to_string()],
    };

    ConfigValidationReport {
        source: config_path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    }
}

/// Effective configuration, whole or one section.
///
/// # Errors
///
/// `CliError::Core` if loading fails, `CliError::Command` for an unknown
/// section name.
pub async fn show(config_path: &Path, section: Option<&str>) -> Result<ConfigReport, CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = HoneyflowConfig::load(config_path).await?;
    let config_toml = match section {
        None => to_toml(&config),
        Some(name) => section_toml(&config, name)?,
    };

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section: section.map(str::to_owned),
        config_toml,
    })
}

fn section_toml(config: &HoneyflowConfig, name: &str) -> Result<String, CliError> {
    let rendered = match name {
        "general" => to_toml(&config.general),
        "southbound" => to_toml(&config.southbound),
        "control" => to_toml(&config.control),
        "engine" => to_toml(&config.engine),
        "detection" => to_toml(&config.detection),
        "classification" => to_toml(&config.classification),
        "load_balancer" => to_toml(&config.load_balancer),
        "honeypots" => to_toml(&config.honeypots),
        "forwarding" => to_toml(&config.forwarding),
        "topology" => to_toml(&config.topology),
        "oracle" => to_toml(&config.oracle),
        "metrics" => to_toml(&config.metrics),
        _ => {
            return Err(CliError::Command(format!(
                "unknown section: {name} (expected one of: {})",
                SECTIONS.join(", ")
            )));
        }
    };
    Ok(rendered)
}

fn to_toml<T: Serialize>(value: &T) -> String {
    toml::to_string_pretty(value).unwrap_or_else(|e| format!("(serialization error: {e})"))
}

/// The TOML text is only used for text output.
#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match &self.section {
            Some(section) => writeln!(
                w,
                "Configuration {} (source: {})",
                format!("[{section}]").bold(),
                self.source
            )?,
            None => writeln!(w, "Configuration (source: {})", self.source.bold())?,
        }
        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}
