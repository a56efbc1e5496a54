//! Run command
//!
//! Submits a batch of tasks to one experiment group and prints each result
//! as it arrives.

use anyhow::{Context, Result, bail};
use colored::*;
use harvest_client::{CompletionService, Timeout};
use harvest_core::domain::cloud::CloudKind;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;

/// Longest wait between checks for failed tasks
const FAILURE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Parsed arguments of `harvest run`
pub struct RunRequest {
    pub experiment_id: String,
    pub script: PathBuf,
    pub args: PathBuf,
    pub files: BTreeMap<String, PathBuf>,
    pub cloud: Option<CloudKind>,
    pub workers: Option<usize>,
    pub timeout: i64,
}

/// Handle `harvest run`
///
/// The session is always closed, also when submission or retrieval fails.
pub async fn handle_run(request: RunRequest, config: &Config) -> Result<()> {
    let tasks = read_tasks(&request.args)?;
    if tasks.is_empty() {
        println!("{}", "No tasks found in arguments file.".yellow());
        return Ok(());
    }

    let mut session_config = config.session_config()?;
    if let Some(cloud) = request.cloud {
        session_config = session_config.with_cloud(cloud);
    }
    if let Some(workers) = request.workers {
        session_config = session_config.with_num_workers(workers);
    }

    let backends = config.backends().await?;
    let mut service = CompletionService::start(&request.experiment_id, session_config, backends)
        .await
        .with_context(|| format!("Failed to start session for {}", request.experiment_id))?;

    let outcome = submit_and_collect(&mut service, &request, &tasks).await;
    let closed = service
        .close()
        .await
        .context("Failed to release completion service");

    outcome?;
    closed
}

async fn submit_and_collect(
    service: &mut CompletionService,
    request: &RunRequest,
    tasks: &[Value],
) -> Result<()> {
    for task in tasks {
        service
            .submit_with_files(&request.script, task, &request.files)
            .await
            .context("Failed to submit task")?;
    }

    println!(
        "{}",
        format!(
            "Submitted {} task(s) to {}",
            tasks.len(),
            service.project_name()
        )
        .bold()
    );
    if service.cloud().is_spot() {
        println!(
            "{}",
            format!("  {} workers run on spot capacity", service.cloud()).dimmed()
        );
    }
    info!("Waiting on queue {}", service.queue_name());

    let summary = collect_results(service, Timeout::from(request.timeout)).await?;

    if !summary.failed.is_empty() {
        println!(
            "{}",
            format!("{} task(s) failed without a result:", summary.failed.len()).red()
        );
        for key in &summary.failed {
            println!("  {} {}", "✗".red(), key);
        }
    }
    if summary.timed_out {
        warn!("Timed out with {} result(s) outstanding", service.pending());
        println!(
            "{}",
            format!("Timed out; {} result(s) outstanding.", service.pending()).yellow()
        );
    }

    Ok(())
}

/// What a run ended with
#[derive(Debug, Default)]
struct RunSummary {
    collected: Vec<String>,
    failed: Vec<String>,
    timed_out: bool,
}

enum Next {
    Result(String, Value),
    AllFailed(Vec<String>),
    TimedOut,
}

/// Prints results until every task is collected, failed or a wait times out
async fn collect_results(service: &mut CompletionService, timeout: Timeout) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    while service.pending() > 0 {
        match next_result(service, timeout).await? {
            Next::Result(key, value) => {
                println!("{}  {}", key.cyan(), value);
                summary.collected.push(key);
            }
            Next::AllFailed(keys) => {
                summary.failed = keys;
                break;
            }
            Next::TimedOut => {
                summary.timed_out = true;
                break;
            }
        }
    }

    Ok(summary)
}

/// Waits for one result, checking for failed tasks between short polls
async fn next_result(service: &mut CompletionService, timeout: Timeout) -> Result<Next> {
    let started = Instant::now();

    loop {
        let failed = service
            .failed()
            .await
            .context("Failed to check task status")?;
        if !failed.is_empty() && failed.len() == service.pending() {
            return Ok(Next::AllFailed(failed));
        }

        let slice = match timeout {
            Timeout::NoWait => Timeout::NoWait,
            Timeout::Forever => Timeout::After(FAILURE_CHECK_INTERVAL),
            Timeout::After(limit) => Timeout::After(
                limit
                    .saturating_sub(started.elapsed())
                    .min(FAILURE_CHECK_INTERVAL),
            ),
        };

        if let Some((key, value)) = service
            .get_results_with_timeout::<Value>(slice)
            .await
            .context("Failed to retrieve result")?
        {
            return Ok(Next::Result(key, value));
        }

        match timeout {
            Timeout::NoWait => return Ok(Next::TimedOut),
            Timeout::After(limit) if started.elapsed() > limit => return Ok(Next::TimedOut),
            _ => {}
        }
    }
}

/// Reads one JSON value per non-empty line
fn read_tasks(path: &Path) -> Result<Vec<Value>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read arguments file {}", path.display()))?;

    parse_tasks(&body).with_context(|| format!("Invalid arguments file {}", path.display()))
}

fn parse_tasks(body: &str) -> Result<Vec<Value>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", index + 1))
        })
        .collect()
}

/// Parses a `tag=path` pair
pub fn parse_file_tag(raw: &str) -> Result<(String, PathBuf)> {
    let Some((tag, path)) = raw.split_once('=') else {
        bail!("expected tag=path, got '{}'", raw);
    };
    if tag.is_empty() || path.is_empty() {
        bail!("expected tag=path, got '{}'", raw);
    }

    Ok((tag.to_string(), PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_client::Verbosity;
    use harvest_core::domain::experiment::ExperimentStatus;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tasks_skips_blank_lines() {
        let tasks = parse_tasks("{\"lr\": 0.1}\n\n[1, 2]\n  \n\"x\"\n").unwrap();
        assert_eq!(tasks, vec![json!({ "lr": 0.1 }), json!([1, 2]), json!("x")]);
    }

    #[test]
    fn test_parse_tasks_reports_line() {
        let err = parse_tasks("1\n{oops\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_task_ends_the_run() {
        let store = TempDir::new().unwrap();
        let config = Config {
            store_dir: store.path().to_path_buf(),
            gateway_url: None,
            verbose: Verbosity::Info,
        };
        let script = store.path().join("task.py");
        std::fs::write(&script, "def run(x): return x").unwrap();

        let session_config = config
            .session_config()
            .unwrap()
            .with_cloud(CloudKind::Local)
            .with_local_worker_program("true");
        let backends = config.backends().await.unwrap();
        let mut service = CompletionService::start("exp1", session_config, backends)
            .await
            .unwrap();

        let finished = service.submit(&script, &json!(1)).await.unwrap();
        let failed = service.submit(&script, &json!(2)).await.unwrap();

        let directory = config.directory().await.unwrap();
        directory.put_artifact(&finished, "retval", b"2").await.unwrap();
        directory
            .set_status(&finished, ExperimentStatus::Finished)
            .await
            .unwrap();
        directory
            .set_status(&failed, ExperimentStatus::Failed)
            .await
            .unwrap();

        let summary = collect_results(&mut service, Timeout::Forever).await.unwrap();

        assert_eq!(summary.collected, vec![finished]);
        assert_eq!(summary.failed, vec![failed]);
        assert!(!summary.timed_out);

        service.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_times_out() {
        let store = TempDir::new().unwrap();
        let config = Config {
            store_dir: store.path().to_path_buf(),
            gateway_url: None,
            verbose: Verbosity::Info,
        };
        let script = store.path().join("task.py");
        std::fs::write(&script, "def run(x): return x").unwrap();

        let session_config = config
            .session_config()
            .unwrap()
            .with_cloud(CloudKind::Local)
            .with_local_worker_program("true");
        let backends = config.backends().await.unwrap();
        let mut service = CompletionService::start("exp1", session_config, backends)
            .await
            .unwrap();
        service.submit(&script, &json!(1)).await.unwrap();

        let summary = collect_results(&mut service, Timeout::from(12_i64)).await.unwrap();

        assert!(summary.collected.is_empty());
        assert!(summary.timed_out);
        assert_eq!(service.pending(), 1);

        service.close().await.unwrap();
    }

    #[test]
    fn test_parse_file_tag() {
        assert_eq!(
            parse_file_tag("dataset=data/train.csv").unwrap(),
            ("dataset".to_string(), PathBuf::from("data/train.csv"))
        );
        assert!(parse_file_tag("dataset").is_err());
        assert!(parse_file_tag("=x").is_err());
    }
}
