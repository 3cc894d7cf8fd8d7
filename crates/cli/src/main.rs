//! # Connectome CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - Single-subject and batch pipeline runs
//! - Graceful abort on Ctrl+C / SIGTERM

mod cli;
mod commands;
mod error;
mod shutdown;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_batch_command, run_info, run_subject_command, run_validate};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_observability(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Connectome CLI starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_subject_command(args).await,
        Commands::Batch(args) => run_batch_command(args).await,
        Commands::Validate(args) => run_validate(args).map(|()| 0),
        Commands::Info(args) => run_info(args).map(|()| 0),
    };

    match result {
        Ok(code) => Ok(ExitCode::from(u8::try_from(code).unwrap_or(1))),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

/// Initialize logging (and optionally metrics) based on CLI options
fn init_observability(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: cli.metrics_port,
        default_log_level: default_log_level.to_string(),
    })
}
