//! Worker provisioning
//!
//! Cloud fleets are started through a `WorkerPool` backend. In local mode
//! the session starts a single worker process itself and joins it on exit.

use async_trait::async_trait;
use harvest_core::domain::resources::ResourceRequirements;
use reqwest::Client;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CompletionError, Result};

/// Parameters for starting a fleet of workers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRequest {
    /// Queue the workers consume
    pub queue_name: String,
    /// Spot bid
    pub bid: String,
    pub resources_needed: Option<ResourceRequirements>,
    /// Workers started immediately
    pub count: usize,
    /// Let the pool add workers as the queue grows
    pub autoscale: bool,
    pub ssh_keypair: Option<String>,
    /// Workers shut down after this long without work
    pub timeout: Duration,
}

impl WorkerRequest {
    pub fn from_config(config: &Config, queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            bid: config.bid.clone(),
            resources_needed: config.resources_needed.clone(),
            count: config.num_workers,
            autoscale: true,
            ssh_keypair: config.ssh_keypair.clone(),
            timeout: config.cloud_timeout,
        }
    }
}

/// Backend that provisions remote workers
///
/// Implementations own retries and instance lifecycle; the completion
/// service calls `start_workers` once per session.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn start_workers(&self, request: &WorkerRequest) -> Result<()>;
}

/// Worker pool reached through the platform gateway
///
/// Posts the `WorkerRequest` as JSON to `{base}/api/workers`; the gateway
/// starts the instances and binds them to the queue.
#[derive(Debug, Clone)]
pub struct HttpWorkerPool {
    base_url: String,
    client: Client,
}

impl HttpWorkerPool {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn workers_url(&self) -> String {
        format!("{}/api/workers", self.base_url)
    }
}

#[async_trait]
impl WorkerPool for HttpWorkerPool {
    async fn start_workers(&self, request: &WorkerRequest) -> Result<()> {
        let response = self
            .client
            .post(self.workers_url())
            .json(request)
            .send()
            .await
            .map_err(|e| CompletionError::Provisioning(format!("gateway unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::Provisioning(format!(
                "gateway refused {} worker(s) for {} (status {}): {}",
                request.count,
                request.queue_name,
                status.as_u16(),
                error_text
            )));
        }

        info!(
            "Requested {} worker(s) for queue {}",
            request.count, request.queue_name
        );
        Ok(())
    }
}

/// A worker process running on this machine
#[derive(Debug)]
pub struct LocalWorker {
    program: String,
    child: Child,
}

impl LocalWorker {
    /// Starts `<program> --verbose=<level> --timeout=<secs>`
    pub fn spawn(config: &Config) -> Result<Self> {
        let program = config.local_worker_program.clone();
        let args = Self::args(config);

        debug!("Starting local worker: {} {}", program, args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                CompletionError::Provisioning(format!(
                    "Failed to start local worker '{}': {}",
                    program, e
                ))
            })?;

        info!("Local worker started (pid {:?})", child.id());

        Ok(Self { program, child })
    }

    fn args(config: &Config) -> Vec<String> {
        vec![
            format!("--verbose={}", config.verbose),
            format!("--timeout={}", config.cloud_timeout.as_secs()),
        ]
    }

    /// Waits for the worker process to exit
    pub async fn wait(mut self) -> Result<()> {
        let status = self.child.wait().await?;

        if status.success() {
            debug!("Local worker {} exited", self.program);
        } else {
            warn!("Local worker {} exited with {}", self.program, status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::domain::cloud::CloudKind;
    use crate::config::Verbosity;

    #[test]
    fn test_worker_request_from_config() {
        let config = Config::default()
            .with_cloud(CloudKind::Ec2Spot)
            .with_num_workers(4)
            .with_ssh_keypair("ops-key");

        let request = WorkerRequest::from_config(&config, "sqs_exp1");

        assert_eq!(request.queue_name, "sqs_exp1");
        assert_eq!(request.count, 4);
        assert_eq!(request.bid, "100%");
        assert!(request.autoscale);
        assert_eq!(request.ssh_keypair.as_deref(), Some("ops-key"));
        assert_eq!(request.timeout, Duration::from_secs(100));
    }

    #[test]
    fn test_worker_request_json() {
        let config = Config::default().with_cloud(CloudKind::GCloud);
        let request = WorkerRequest::from_config(&config, "pubsub_exp1");

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["queue_name"], "pubsub_exp1");
        assert_eq!(json["count"], 1);
        assert_eq!(json["timeout"]["secs"], 100);
    }

    #[test]
    fn test_http_pool_url() {
        let pool = HttpWorkerPool::new("http://gateway:8090/");
        assert_eq!(pool.workers_url(), "http://gateway:8090/api/workers");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_provisioning_error() {
        let pool = HttpWorkerPool::new("http://127.0.0.1:1");
        let request = WorkerRequest::from_config(&Config::default(), "sqs_exp1");

        let err = pool.start_workers(&request).await.unwrap_err();

        assert!(matches!(err, CompletionError::Provisioning(_)));
    }

    #[test]
    fn test_local_worker_args() {
        let mut config = Config::default().with_verbose(Verbosity::Debug);
        config.cloud_timeout = Duration::from_secs(30);

        assert_eq!(
            LocalWorker::args(&config),
            vec!["--verbose=debug".to_string(), "--timeout=30".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_provisioning_error() {
        let config = Config::default().with_local_worker_program("harvest-no-such-worker-binary");

        let err = LocalWorker::spawn(&config).unwrap_err();

        assert!(matches!(err, CompletionError::Provisioning(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_joins_process() {
        let config = Config::default().with_local_worker_program("true");

        let worker = LocalWorker::spawn(&config).unwrap();

        worker.wait().await.unwrap();
    }
}
