//! Completion service configuration
//!
//! Defines every tunable of a session: where workers run, how many are
//! started, how results are polled and where temporary data is written.
//! A `Config` is built explicitly and handed to the session; nothing is
//! read from process-wide state after construction.

use harvest_core::domain::cloud::CloudKind;
use harvest_core::domain::resources::ResourceRequirements;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CompletionError, Result};

/// Log verbosity forwarded to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Debug => "debug",
            Verbosity::Info => "info",
            Verbosity::Warn => "warn",
            Verbosity::Error => "error",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Verbosity::Debug),
            "info" => Ok(Verbosity::Info),
            "warn" | "warning" => Ok(Verbosity::Warn),
            "error" => Ok(Verbosity::Error),
            other => Err(format!("unknown verbosity '{}'", other)),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Verbosity passed to workers and recorded in experiment entry args
    pub verbose: Verbosity,

    /// Deployment target for workers and queue
    pub cloud: CloudKind,

    /// Number of cloud workers started on session entry
    pub num_workers: usize,

    /// Idle timeout handed to workers
    pub cloud_timeout: Duration,

    /// Spot bid, either a percentage of the on-demand price ("100%") or a price
    pub bid: String,

    /// Keypair installed on cloud workers
    pub ssh_keypair: Option<String>,

    /// Retrieve from the whole project and delete consumed records
    pub resumable: bool,

    /// Scheduling hints attached to each experiment
    pub resources_needed: Option<ResourceRequirements>,

    /// Delay between directory polls while waiting for results
    pub poll_interval: Duration,

    /// Directory for serialized argument blobs
    pub temp_dir: PathBuf,

    /// Directory holding per-experiment workspace snapshots
    pub artifact_cache: PathBuf,

    /// Directory snapshotted as the `workspace` artifact
    pub workspace_dir: Option<PathBuf>,

    /// Worker-side script that loads `clientscript` and `args`
    pub client_entrypoint: String,

    /// Program started as the local worker
    pub local_worker_program: String,
}

impl Config {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        let temp_dir = std::env::temp_dir();
        Self {
            verbose: Verbosity::Info,
            cloud: CloudKind::Local,
            num_workers: 1,
            cloud_timeout: Duration::from_secs(100),
            bid: "100%".to_string(),
            ssh_keypair: None,
            resumable: false,
            resources_needed: None,
            poll_interval: Duration::from_secs(1),
            artifact_cache: temp_dir.join("harvest-artifacts"),
            temp_dir,
            workspace_dir: None,
            client_entrypoint: "completion_client".to_string(),
            local_worker_program: "harvest-local-worker".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional; unset variables keep their defaults:
    /// - HARVEST_VERBOSE (debug, info, warn, error)
    /// - HARVEST_CLOUD (local, gcloud, gcspot, ec2, ec2spot)
    /// - HARVEST_NUM_WORKERS
    /// - HARVEST_CLOUD_TIMEOUT (seconds)
    /// - HARVEST_BID
    /// - HARVEST_SSH_KEYPAIR
    /// - HARVEST_RESUMABLE (true/false)
    /// - HARVEST_POLL_INTERVAL (seconds)
    /// - HARVEST_TEMP_DIR
    /// - HARVEST_ARTIFACT_CACHE
    /// - HARVEST_WORKSPACE_DIR
    /// - HARVEST_LOCAL_WORKER
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new();

        if let Some(verbose) = parse_var(&var, "HARVEST_VERBOSE")? {
            config.verbose = verbose;
        }
        if let Some(cloud) = parse_var(&var, "HARVEST_CLOUD")? {
            config.cloud = cloud;
        }
        if let Some(num_workers) = parse_var(&var, "HARVEST_NUM_WORKERS")? {
            config.num_workers = num_workers;
        }
        if let Some(secs) = parse_var::<u64>(&var, "HARVEST_CLOUD_TIMEOUT")? {
            config.cloud_timeout = Duration::from_secs(secs);
        }
        if let Some(bid) = var("HARVEST_BID") {
            config.bid = bid;
        }
        if let Some(keypair) = var("HARVEST_SSH_KEYPAIR") {
            config.ssh_keypair = Some(keypair);
        }
        if let Some(resumable) = parse_var(&var, "HARVEST_RESUMABLE")? {
            config.resumable = resumable;
        }
        if let Some(secs) = parse_var::<u64>(&var, "HARVEST_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = var("HARVEST_TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("HARVEST_ARTIFACT_CACHE") {
            config.artifact_cache = PathBuf::from(dir);
        }
        if let Some(dir) = var("HARVEST_WORKSPACE_DIR") {
            config.workspace_dir = Some(PathBuf::from(dir));
        }
        if let Some(program) = var("HARVEST_LOCAL_WORKER") {
            config.local_worker_program = program;
        }

        Ok(config)
    }

    pub fn with_cloud(mut self, cloud: CloudKind) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    pub fn with_verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources_needed = Some(resources);
        self
    }

    pub fn with_ssh_keypair(mut self, keypair: impl Into<String>) -> Self {
        self.ssh_keypair = Some(keypair.into());
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    /// Places argument blobs and workspace snapshots under `root`
    pub fn with_scratch_dir(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.artifact_cache = root.join("artifacts");
        self.temp_dir = root.join("tmp");
        self
    }

    pub fn with_local_worker_program(mut self, program: impl Into<String>) -> Self {
        self.local_worker_program = program.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(invalid("num_workers must be greater than 0"));
        }

        if !is_valid_bid(&self.bid) {
            return Err(invalid(format!(
                "bid must be a percentage (e.g. 100%) or a price, got '{}'",
                self.bid
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than 0"));
        }

        if self.client_entrypoint.trim().is_empty() {
            return Err(invalid("client_entrypoint cannot be empty"));
        }

        if self.cloud.is_local() && self.local_worker_program.trim().is_empty() {
            return Err(invalid("local_worker_program cannot be empty"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: impl Into<String>) -> CompletionError {
    CompletionError::Config(message.into())
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(format!("{}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}

fn is_valid_bid(bid: &str) -> bool {
    let bid = bid.trim();
    let amount = bid.strip_suffix('%').unwrap_or(bid);
    amount.parse::<f64>().is_ok_and(|value| value > 0.0)
}
