//! Harvest CLI
//!
//! Command-line interface for submitting work to Harvest workers and
//! collecting the results.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use harvest_client::Verbosity;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Harvest distributed work CLI", long_about = None)]
struct Cli {
    /// Directory holding the experiment store, spool queues and scratch files
    #[arg(long, env = "HARVEST_STORE_DIR", default_value = ".harvest")]
    store_dir: PathBuf,

    /// Gateway fronting pub/sub and SQS queues and the worker pool
    #[arg(long, env = "HARVEST_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Log verbosity, also forwarded to workers
    #[arg(long, env = "HARVEST_VERBOSE", default_value = "info")]
    verbose: Verbosity,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("harvest_cli={0},harvest_client={0}", cli.verbose).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config {
        store_dir: cli.store_dir,
        gateway_url: cli.gateway_url,
        verbose: cli.verbose,
    };

    handle_command(cli.command, &config).await
}
