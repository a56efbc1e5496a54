//! Status command

use anyhow::{Context, Result};
use colored::*;
use harvest_client::repository::ExperimentDirectory;
use harvest_client::service::PROJECT_PREFIX;
use harvest_core::domain::experiment::{Experiment, ExperimentStatus};

use crate::config::Config;

/// Handle `harvest status`
pub async fn handle_status(experiment_id: &str, config: &Config) -> Result<()> {
    let directory = config.directory().await?;
    let project = format!("{}{}", PROJECT_PREFIX, experiment_id);

    let mut experiments = directory
        .get_project_experiments(&project)
        .await
        .with_context(|| format!("Failed to list experiments of {}", project))?;

    if experiments.is_empty() {
        println!(
            "{}",
            format!("No experiments found for {}.", experiment_id).yellow()
        );
        return Ok(());
    }

    experiments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let finished = experiments.iter().filter(|e| e.is_finished()).count();
    println!(
        "{}",
        format!(
            "{} experiment(s) in {}, {} finished:",
            experiments.len(),
            project,
            finished
        )
        .bold()
    );
    println!();

    for experiment in &experiments {
        print_experiment(experiment);
    }

    Ok(())
}

fn print_experiment(experiment: &Experiment) {
    println!("  {} {}", "▸".cyan(), experiment.key.dimmed());
    println!("    Status:   {}", colorize_status(&experiment.status));
    println!(
        "    Created:  {}",
        experiment
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );

    if let (Some(started), Some(finished)) = (experiment.started_at, experiment.finished_at) {
        let seconds = finished.signed_duration_since(started).num_seconds();
        println!("    Duration: {}s", seconds);
    }
    println!();
}

/// Colorize experiment status for display
fn colorize_status(status: &ExperimentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ExperimentStatus::Pending => label.yellow(),
        ExperimentStatus::Running => label.cyan(),
        ExperimentStatus::Finished => label.green(),
        ExperimentStatus::Failed => label.red(),
    }
}
