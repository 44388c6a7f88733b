//! `honeyflow` -- operator CLI for the honeyflow daemon.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use honeyflow_cli::cli::{Cli, Commands};
use honeyflow_cli::commands;
use honeyflow_cli::error::CliError;
use honeyflow_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries command output, so logs go to stderr
    let filter = cli
        .log_level
        .as_deref()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config_path = cli.config.as_path();

    match cli.command {
        Commands::Config(args) => commands::config::execute(args, config_path, &writer).await,
        Commands::Status(args) => commands::status::execute(args, config_path, &writer).await,
        Commands::Stats(args) => commands::stats::execute(args, config_path, &writer).await,
        Commands::Feedback(args) => commands::feedback::execute(args, config_path, &writer).await,
    }
}
