//! Collect command
//!
//! Reattaches to a resumable experiment group and drains the results that
//! earlier runs left behind.

use anyhow::{Context, Result, bail};
use colored::*;
use harvest_client::{CompletionError, CompletionService};
use serde_json::Value;

use crate::config::Config;

/// Handle `harvest collect`
///
/// Restarting the session restarts its workers, which keep consuming the
/// group's queue. Each result is deleted from the store once printed.
pub async fn handle_collect(experiment_id: &str, timeout: i64, config: &Config) -> Result<()> {
    let session_config = config.session_config()?.with_resumable(true);
    let backends = config.backends().await?;

    let mut service = CompletionService::start(experiment_id, session_config, backends)
        .await
        .with_context(|| format!("Failed to start session for {}", experiment_id))?;

    let outcome = drain(&mut service, timeout).await;
    let closed = service
        .close()
        .await
        .context("Failed to release completion service");

    let collected = outcome?;
    closed?;

    if collected == 0 {
        println!("{}", "No finished results.".yellow());
    } else {
        println!("{}", format!("Collected {} result(s).", collected).bold());
    }

    Ok(())
}

async fn drain(service: &mut CompletionService, timeout: i64) -> Result<usize> {
    let mut collected = 0;

    loop {
        match service.get_results_with_timeout::<Value>(timeout).await {
            Ok(Some((key, value))) => {
                println!("{}  {}", key.cyan(), value);
                collected += 1;
            }
            Ok(None) => return Ok(collected),
            Err(CompletionError::Retrieval { key, message }) => {
                println!("{}", format!("Result of {} is unreadable: {}", key, message).red());
                println!("{}", unreadable_hint(service.experiment_id(), &key).dimmed());
                bail!("collection stopped at {} after {} result(s)", key, collected);
            }
            Err(e) => return Err(e).context("Failed to retrieve result"),
        }
    }
}

/// How to clear a record that blocks collection
fn unreadable_hint(experiment_id: &str, key: &str) -> String {
    format!(
        "Results behind it are held back. Remove it with:\n  harvest discard --experiment-id {} --key {}",
        experiment_id, key
    )
}
