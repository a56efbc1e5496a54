//! Completion service
//!
//! A `CompletionService` is a session bound to one experiment group. It
//! packages tasks into experiment records, hands them to the group's queue,
//! remembers what it submitted, and polls the experiment directory until
//! results appear.
//!
//! Sessions are scoped resources: `start` opens the queue and provisions
//! workers, `close` deletes the queue (unless it is the shared local queue)
//! and joins the local worker. A session dropped without `close` releases
//! the same resources in the background.

use harvest_core::domain::artifact::{Artifact, tags};
use harvest_core::domain::cloud::CloudKind;
use harvest_core::domain::experiment::Experiment;
use harvest_core::dto::experiment::CreateExperiment;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CompletionError, Result};
use crate::repository::{
    Backends, ExperimentDirectory, LocalWorker, QueueTransport, WorkerPool, WorkerRequest,
};
use crate::workspace;

/// Prefix of every project created by a completion service
pub const PROJECT_PREFIX: &str = "completion_service_";

/// How long a retrieval call may wait for a finished experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Check once and return
    NoWait,
    /// Wait until some experiment finishes
    Forever,
    /// Keep polling until the time slept exceeds the limit
    After(Duration),
}

impl From<i64> for Timeout {
    /// Seconds: zero checks once, negative blocks indefinitely
    fn from(secs: i64) -> Self {
        match secs {
            0 => Timeout::NoWait,
            s if s < 0 => Timeout::Forever,
            s => Timeout::After(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(limit: Duration) -> Self {
        if limit.is_zero() {
            Timeout::NoWait
        } else {
            Timeout::After(limit)
        }
    }
}

/// Session for submitting tasks of one experiment group and collecting
/// their results
pub struct CompletionService {
    experiment_id: String,
    project_name: String,
    queue_name: String,
    config: Config,
    directory: Arc<dyn ExperimentDirectory>,

    /// Taken on release
    queue: Option<Box<dyn QueueTransport>>,
    local_worker: Option<LocalWorker>,

    /// Keys submitted by this session whose results were not read yet
    submitted: HashSet<String>,

    span: Span,
}

impl CompletionService {
    /// Opens the group's queue and provisions workers
    ///
    /// In local mode a single worker process is started; otherwise the
    /// backend's `WorkerPool` starts `num_workers` instances bound to the
    /// queue. If provisioning fails the queue is released again and no
    /// session is returned.
    pub async fn start(
        experiment_id: impl Into<String>,
        config: Config,
        backends: Backends,
    ) -> Result<Self> {
        config.validate()?;

        let experiment_id = experiment_id.into();
        validate_experiment_id(&experiment_id)?;
        let transport = config.cloud.transport();
        let queue_name = transport.queue_name(&experiment_id);
        let span = info_span!(
            "completion_service",
            experiment_id = %experiment_id,
            queue = %queue_name
        );

        let queue = backends.transports.open(&queue_name, transport)?;

        let provisioned = provision(&config, &queue_name, backends.workers.as_deref())
            .instrument(span.clone())
            .await;

        let local_worker = match provisioned {
            Ok(local_worker) => local_worker,
            Err(e) => {
                span.in_scope(|| warn!("Worker provisioning failed: {}", e));
                release(Some(queue), None).instrument(span.clone()).await.ok();
                return Err(e);
            }
        };

        span.in_scope(|| info!("Completion service started ({})", config.cloud));

        Ok(Self {
            project_name: format!("{}{}", PROJECT_PREFIX, experiment_id),
            experiment_id,
            queue_name,
            config,
            directory: backends.directory,
            queue: Some(queue),
            local_worker,
            submitted: HashSet::new(),
            span,
        })
    }

    /// Releases the queue and waits for the local worker
    ///
    /// Both steps are attempted; the first error is returned. Work already
    /// enqueued is not retracted.
    pub async fn close(mut self) -> Result<()> {
        let queue = self.queue.take();
        let local_worker = self.local_worker.take();

        release(queue, local_worker)
            .instrument(self.span.clone())
            .await
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn cloud(&self) -> CloudKind {
        self.config.cloud
    }

    pub fn is_resumable(&self) -> bool {
        self.config.resumable
    }

    /// Keys submitted by this session and not yet retrieved
    pub fn submitted(&self) -> impl Iterator<Item = &str> {
        self.submitted.iter().map(String::as_str)
    }

    /// Number of tracked submissions
    pub fn pending(&self) -> usize {
        self.submitted.len()
    }

    /// Tracked keys whose experiment ended without a result, sorted
    ///
    /// Such keys stay tracked; no retrieval will ever return them.
    pub async fn failed(&self) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for key in &self.submitted {
            let experiment = self.tracked_experiment(key).await?;
            if experiment.status.is_terminal() && !experiment.is_finished() {
                failed.push(experiment.key);
            }
        }

        failed.sort();
        Ok(failed)
    }

    // =============================================================================
    // Submission
    // =============================================================================

    /// Submits a task and returns its experiment name
    pub async fn submit<A>(&mut self, client_code: impl AsRef<Path>, args: &A) -> Result<String>
    where
        A: Serialize + ?Sized,
    {
        self.submit_with_files(client_code, args, &BTreeMap::new())
            .await
    }

    /// Submits a task with extra input files
    ///
    /// # Arguments
    /// * `client_code` - Executable unit of work run by the worker
    /// * `args` - Payload handed to the client code
    /// * `files` - Extra inputs by tag; reserved tags are rejected
    ///
    /// # Returns
    /// The experiment name, which is also the key results are reported under
    pub async fn submit_with_files<A>(
        &mut self,
        client_code: impl AsRef<Path>,
        args: &A,
        files: &BTreeMap<String, PathBuf>,
    ) -> Result<String>
    where
        A: Serialize + ?Sized,
    {
        let span = self.span.clone();
        self.submit_inner(client_code.as_ref(), args, files)
            .instrument(span)
            .await
    }

    async fn submit_inner<A>(
        &mut self,
        client_code: &Path,
        args: &A,
        files: &BTreeMap<String, PathBuf>,
    ) -> Result<String>
    where
        A: Serialize + ?Sized,
    {
        if let Some(tag) = files.keys().find(|tag| tags::is_reserved(tag)) {
            return Err(CompletionError::InvalidRequest(format!(
                "file tag '{}' is reserved",
                tag
            )));
        }

        // Random suffix; uniqueness is probabilistic and not checked
        let experiment_name = format!("{}_{}", self.project_name, Uuid::new_v4());

        let payload = serde_json::to_vec(args).map_err(CompletionError::Serialization)?;
        let args_file = write_args_blob(&self.config.temp_dir, &experiment_name, payload).await?;

        let mut artifacts = BTreeMap::new();
        artifacts.insert(tags::RETVAL.to_string(), Artifact::output());
        artifacts.insert(
            tags::CLIENTSCRIPT.to_string(),
            Artifact::immutable(workspace::resolve_local_path(client_code)?),
        );
        artifacts.insert(tags::ARGS.to_string(), Artifact::immutable(args_file.path()));

        let snapshot = workspace::snapshot(
            self.config.workspace_dir.as_deref(),
            &self.config.artifact_cache,
            &experiment_name,
        )
        .await?;
        artifacts.insert(
            tags::WORKSPACE.to_string(),
            Artifact::immutable(snapshot.path()),
        );

        for (tag, path) in files {
            artifacts.insert(
                tag.clone(),
                Artifact::immutable(workspace::resolve_local_path(path)?),
            );
        }

        let experiment = self
            .directory
            .create_experiment(CreateExperiment {
                key: experiment_name.clone(),
                project: self.project_name.clone(),
                entrypoint: self.config.client_entrypoint.clone(),
                entry_args: vec![self.config.verbose.to_string()],
                artifacts,
                resources_needed: self.config.resources_needed.clone(),
            })
            .await?;

        // Inputs are captured by the directory; the scratch copies can go
        drop(args_file);
        drop(snapshot);

        let queue = self.queue.as_deref().ok_or_else(|| {
            CompletionError::Transport(format!("queue {} was released", self.queue_name))
        })?;

        if let Err(e) = queue.submit(std::slice::from_ref(&experiment)).await {
            warn!("Failed to enqueue {}: {}", experiment.key, e);
            if let Err(cleanup) = self.directory.delete_experiment(&experiment.key).await {
                warn!(
                    "Failed to remove unqueued experiment {}: {}",
                    experiment.key, cleanup
                );
            }
            return Err(e);
        }

        self.submitted.insert(experiment.key.clone());

        info!("Submitted experiment {}", experiment.key);

        Ok(experiment_name)
    }

    // =============================================================================
    // Retrieval
    // =============================================================================

    /// Returns one finished result, waiting according to `timeout`
    ///
    /// `Ok(None)` means nothing finished in time. In resumable mode the
    /// result's record is deleted once read; otherwise it is kept and the
    /// key is forgotten by this session.
    ///
    /// Finished experiments are taken oldest first. A finished experiment
    /// whose `retval` cannot be read fails every call with
    /// `CompletionError::Retrieval` until its record is deleted, so results
    /// behind it are not returned meanwhile.
    pub async fn get_results_with_timeout<R>(
        &mut self,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<(String, R)>>
    where
        R: DeserializeOwned,
    {
        let timeout = timeout.into();
        let span = self.span.clone();
        self.poll_results(timeout).instrument(span).await
    }

    /// Blocks until a result is ready, or checks once when `blocking` is false
    pub async fn get_results<R>(&mut self, blocking: bool) -> Result<Option<(String, R)>>
    where
        R: DeserializeOwned,
    {
        let timeout = if blocking {
            Timeout::Forever
        } else {
            Timeout::NoWait
        };
        self.get_results_with_timeout(timeout).await
    }

    async fn poll_results<R>(&mut self, timeout: Timeout) -> Result<Option<(String, R)>>
    where
        R: DeserializeOwned,
    {
        let mut total_sleep = Duration::ZERO;

        loop {
            if let Some(experiment) = self.first_finished().await? {
                debug!("Experiment {} finished, getting results", experiment.key);

                let value = self.read_result(&experiment).await?;
                self.consume(&experiment.key).await?;

                return Ok(Some((experiment.key, value)));
            }

            match timeout {
                Timeout::NoWait => return Ok(None),
                Timeout::After(limit) if total_sleep > limit => return Ok(None),
                _ => {}
            }

            tokio::time::sleep(self.config.poll_interval).await;
            total_sleep += self.config.poll_interval;
        }
    }

    /// Experiments this session may return results for
    async fn candidates(&self) -> Result<Vec<Experiment>> {
        if self.config.resumable {
            return self
                .directory
                .get_project_experiments(&self.project_name)
                .await;
        }

        let mut experiments = Vec::with_capacity(self.submitted.len());
        for key in &self.submitted {
            experiments.push(self.tracked_experiment(key).await?);
        }
        Ok(experiments)
    }

    /// Record of a key this session submitted
    async fn tracked_experiment(&self, key: &str) -> Result<Experiment> {
        self.directory.get_experiment(key).await.map_err(|e| {
            if e.is_not_found() {
                CompletionError::retrieval(key, "record was removed from the directory")
            } else {
                e
            }
        })
    }

    /// Earliest-created finished experiment, ties broken by key
    async fn first_finished(&self) -> Result<Option<Experiment>> {
        let mut candidates = self.candidates().await?;
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(candidates.into_iter().find(Experiment::is_finished))
    }

    async fn read_result<R>(&self, experiment: &Experiment) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let key = &experiment.key;
        let artifact = experiment
            .artifact(tags::RETVAL)
            .ok_or_else(|| CompletionError::retrieval(key, "record has no retval artifact"))?;

        let path = self
            .directory
            .get_artifact(artifact)
            .await
            .map_err(|e| CompletionError::retrieval(key, e.to_string()))?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            CompletionError::retrieval(key, format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_json::from_slice(&bytes)
            .map_err(|e| CompletionError::retrieval(key, format!("corrupt result: {}", e)))
    }

    async fn consume(&mut self, key: &str) -> Result<()> {
        if self.config.resumable {
            self.directory.delete_experiment(key).await?;
        }
        self.submitted.remove(key);

        Ok(())
    }
}

impl Drop for CompletionService {
    fn drop(&mut self) {
        let queue = self.queue.take();
        let local_worker = self.local_worker.take();
        if queue.is_none() && local_worker.is_none() {
            return;
        }

        let _entered = self.span.enter();
        warn!("Completion service dropped without close");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let span = self.span.clone();
                handle.spawn(
                    async move {
                        if let Err(e) = release(queue, local_worker).await {
                            warn!("Background release failed: {}", e);
                        }
                    }
                    .instrument(span),
                );
            }
            Err(_) => warn!(
                "No async runtime available; queue {} was not released",
                self.queue_name
            ),
        }
    }
}

/// Ids become part of store paths and queue names
fn validate_experiment_id(experiment_id: &str) -> Result<()> {
    let allowed = experiment_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if experiment_id.is_empty() || !allowed || experiment_id.contains("..") {
        return Err(CompletionError::InvalidRequest(format!(
            "experiment id '{}' may only contain letters, digits, '-', '_' and single '.'",
            experiment_id
        )));
    }

    Ok(())
}

async fn provision(
    config: &Config,
    queue_name: &str,
    workers: Option<&dyn WorkerPool>,
) -> Result<Option<LocalWorker>> {
    if config.cloud.is_local() {
        debug!("Starting local worker");
        return LocalWorker::spawn(config).map(Some);
    }

    let pool = workers.ok_or_else(|| {
        CompletionError::Provisioning(format!(
            "no worker pool configured for cloud {}",
            config.cloud
        ))
    })?;

    debug!(
        "Spinning up {} {} worker(s)",
        config.num_workers, config.cloud
    );

    pool.start_workers(&WorkerRequest::from_config(config, queue_name))
        .await
        .map_err(|e| match e {
            CompletionError::Provisioning(_) => e,
            other => CompletionError::Provisioning(other.to_string()),
        })?;

    Ok(None)
}

/// Deletes non-local queues and joins the local worker
async fn release(
    queue: Option<Box<dyn QueueTransport>>,
    local_worker: Option<LocalWorker>,
) -> Result<()> {
    let mut first_error = None;

    if let Some(queue) = queue
        && !queue.kind().is_local()
        && let Err(e) = queue.delete().await
    {
        warn!("Failed to delete queue {}: {}", queue.name(), e);
        first_error = Some(e);
    }

    if let Some(worker) = local_worker {
        debug!("Waiting for local worker to exit");
        if let Err(e) = worker.wait().await {
            warn!("Failed to join local worker: {}", e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Writes the serialized arguments to a temporary file removed on drop
async fn write_args_blob(
    temp_dir: &Path,
    experiment_name: &str,
    payload: Vec<u8>,
) -> Result<NamedTempFile> {
    let temp_dir = temp_dir.to_path_buf();
    let prefix = format!("{}_", experiment_name);

    let file = tokio::task::spawn_blocking(move || -> io::Result<NamedTempFile> {
        std::fs::create_dir_all(&temp_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix("_args.json")
            .tempfile_in(&temp_dir)?;
        file.write_all(&payload)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(io::Error::other)??;

    Ok(file)
}
