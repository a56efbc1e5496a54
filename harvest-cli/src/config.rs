//! Configuration module
//!
//! Resolves where the CLI keeps its state and builds the session backends
//! from it.

use anyhow::{Context, Result};
use harvest_client::Verbosity;
use harvest_client::repository::{DefaultTransports, FsExperimentDirectory, HttpWorkerPool};
use harvest_client::{Backends, Config as SessionConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the experiment store, spool queues and scratch files
    pub store_dir: PathBuf,

    /// Gateway for pub/sub and SQS queues and cloud workers
    pub gateway_url: Option<String>,

    pub verbose: Verbosity,
}

impl Config {
    pub fn directory_root(&self) -> PathBuf {
        self.store_dir.join("directory")
    }

    pub fn queue_root(&self) -> PathBuf {
        self.store_dir.join("queues")
    }

    /// Opens the file-backed experiment directory
    pub async fn directory(&self) -> Result<FsExperimentDirectory> {
        let root = self.directory_root();
        FsExperimentDirectory::open(&root)
            .await
            .with_context(|| format!("Failed to open experiment store {}", root.display()))
    }

    /// Session settings: `HARVEST_*` variables with scratch files under the store
    pub fn session_config(&self) -> Result<SessionConfig> {
        let config = SessionConfig::from_env()
            .context("Invalid HARVEST_* environment")?
            .with_scratch_dir(&self.store_dir)
            .with_verbose(self.verbose);

        Ok(config)
    }

    /// Builds the collaborators a session runs against
    pub async fn backends(&self) -> Result<Backends> {
        let directory = self.directory().await?;
        let transports = DefaultTransports::new(self.queue_root(), self.gateway_url.clone());

        let mut backends = Backends::new(Arc::new(directory), Arc::new(transports));
        if let Some(url) = &self.gateway_url {
            backends = backends.with_workers(Arc::new(HttpWorkerPool::new(url.clone())));
        }

        Ok(backends)
    }
}
