//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Connectome - structural connectome preprocessing for BIDS datasets
#[derive(Parser, Debug)]
#[command(
    name = "connectome",
    author,
    version,
    about = "Structural connectome preprocessing pipeline",
    long_about = "Runs the structural connectome preprocessing pipeline on BIDS subjects.\n\n\
                  Orchestrates the external neuroimaging tools stage by stage, tracks \n\
                  every intermediate file and spatial transform, and resumes \n\
                  interrupted runs from the last completed stage."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CONNECTOME_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CONNECTOME_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "CONNECTOME_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one subject
    Run(RunArgs),

    /// Run the pipeline for many subjects
    Batch(BatchArgs),

    /// Validate configuration and stage graph without running tools
    Validate(ValidateArgs),

    /// Display the stage plan
    Info(InfoArgs),
}

/// Options shared by `run` and `batch`
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "connectome.toml",
        env = "CONNECTOME_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the configured run mode
    #[arg(long, value_enum, env = "CONNECTOME_MODE")]
    pub mode: Option<ModeArg>,

    /// Keep running unrelated stages after a failure
    #[arg(long)]
    pub keep_going: bool,

    /// Stop after this stage
    #[arg(long, value_name = "STAGE")]
    pub until: Option<String>,

    /// Override a configuration value (key.path=value), repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Subject label, e.g. sub-001
    pub subject: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Print the rendered commands and exit without running tools
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run record as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `batch` command
#[derive(Parser, Debug, Clone)]
pub struct BatchArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Comma separated subjects (default: every sub-* directory in bids_root)
    #[arg(long, value_delimiter = ',')]
    pub subjects: Vec<String>,

    /// Subjects processed concurrently
    #[arg(short, long, default_value = "1", env = "CONNECTOME_JOBS")]
    pub jobs: usize,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "connectome.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "connectome.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show inputs, outputs and command template of every stage
    #[arg(long)]
    pub stages: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Run mode
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Skip stages whose outputs are already complete
    Resume,
    /// Rerun every stage
    Force,
}

impl From<ModeArg> for contracts::RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Resume => Self::Resume,
            ModeArg::Force => Self::Force,
        }
    }
}
