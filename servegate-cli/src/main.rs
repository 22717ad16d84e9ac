// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Servegate CLI
//!
//! Command-line entry point for the deployment validation gate.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Servegate - readiness and validation gate for model-serving deployments
#[derive(Parser)]
#[command(name = "servegate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "servegate.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the service and run the full validation
    Run(RunArgs),

    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        file: String,
    },

    /// Validate saved benchmark output against the configured thresholds
    Parse {
        /// File holding the benchmark harness output
        file: String,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Service endpoint as host:port
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Readiness timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Readiness poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Maximum batch latency in seconds
    #[arg(long)]
    pub max_latency: Option<f64>,

    /// Minimum input throughput in tokens per second
    #[arg(long)]
    pub min_input_throughput: Option<f64>,

    /// Minimum output throughput in tokens per second
    #[arg(long)]
    pub min_output_throughput: Option<f64>,

    /// Stop after the conformance checks
    #[arg(long)]
    pub skip_benchmark: bool,

    /// Write a JSON run report into this directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for results
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(&cli.config, args).await,
        Commands::Check { file } => commands::check::execute(&file).await,
        Commands::Parse { file } => commands::parse::execute(&cli.config, &file).await,
    }
}

/// RUST_LOG directives win when set and valid; otherwise `-v` picks the level.
fn log_filter(verbose: bool, directives: Option<&str>) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}
