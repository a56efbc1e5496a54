//! Discard command
//!
//! Removes one experiment record, for example a finished experiment whose
//! result cannot be read and blocks `collect`.

use anyhow::{Context, Result, bail};
use colored::*;
use harvest_client::repository::ExperimentDirectory;
use harvest_client::service::PROJECT_PREFIX;

use crate::config::Config;

/// Handle `harvest discard`
pub async fn handle_discard(experiment_id: &str, key: &str, config: &Config) -> Result<()> {
    let project = format!("{}{}", PROJECT_PREFIX, experiment_id);
    if !belongs_to(&project, key) {
        bail!("{} is not an experiment of {}", key, experiment_id);
    }

    let directory = config.directory().await?;
    directory
        .delete_experiment(key)
        .await
        .with_context(|| format!("Failed to discard {}", key))?;

    println!("{} Discarded {}", "✓".green(), key);
    Ok(())
}

/// Keys are `<project>_<suffix>` with no path separators
fn belongs_to(project: &str, key: &str) -> bool {
    key.strip_prefix(project)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| {
            !suffix.is_empty()
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
