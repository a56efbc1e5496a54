//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod collect;
mod discard;
mod run;
mod status;

use anyhow::Result;
use clap::Subcommand;
use harvest_core::domain::cloud::CloudKind;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit one task per line of an arguments file and print the results
    Run {
        /// Experiment group the tasks belong to
        #[arg(long)]
        experiment_id: String,

        /// Client code executed by the workers
        #[arg(long)]
        script: PathBuf,

        /// File with one JSON argument value per line
        #[arg(long)]
        args: PathBuf,

        /// Extra input file as tag=path (repeatable)
        #[arg(long = "file", value_parser = run::parse_file_tag)]
        files: Vec<(String, PathBuf)>,

        /// Where workers run (local, gcloud, gcspot, ec2, ec2spot)
        #[arg(long)]
        cloud: Option<CloudKind>,

        /// Number of cloud workers
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds to wait for each result; negative waits forever
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        timeout: i64,
    },
    /// Drain finished results of a resumable experiment group
    Collect {
        /// Experiment group to collect from
        #[arg(long)]
        experiment_id: String,

        /// Seconds to wait for each result; negative waits forever
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        timeout: i64,
    },
    /// Delete one experiment record of a group
    Discard {
        /// Experiment group the record belongs to
        #[arg(long)]
        experiment_id: String,

        /// Key of the experiment to delete
        #[arg(long)]
        key: String,
    },
    /// Show the experiments of a group
    Status {
        /// Experiment group to inspect
        #[arg(long)]
        experiment_id: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run {
            experiment_id,
            script,
            args,
            files,
            cloud,
            workers,
            timeout,
        } => {
            let request = run::RunRequest {
                experiment_id,
                script,
                args,
                files: files.into_iter().collect(),
                cloud,
                workers,
                timeout,
            };
            run::handle_run(request, config).await
        }
        Commands::Collect {
            experiment_id,
            timeout,
        } => collect::handle_collect(&experiment_id, timeout, config).await,
        Commands::Discard { experiment_id, key } => {
            discard::handle_discard(&experiment_id, &key, config).await
        }
        Commands::Status { experiment_id } => status::handle_status(&experiment_id, config).await,
    }
}
