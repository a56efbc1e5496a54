//! Experiment directory
//!
//! The directory is the durable record of every experiment: its status,
//! project and artifact map. Clients create and poll records; workers
//! update status and publish results.

use async_trait::async_trait;
use chrono::Utc;
use harvest_core::domain::artifact::Artifact;
use harvest_core::domain::experiment::{Experiment, ExperimentStatus};
use harvest_core::dto::experiment::CreateExperiment;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{CompletionError, Result};
use crate::workspace::copy_tree;

/// Repository trait for the experiment directory and its artifact store
#[async_trait]
pub trait ExperimentDirectory: Send + Sync {
    /// Creates a durable record with status `pending`
    ///
    /// Immutable artifacts carrying a local path are captured into the
    /// artifact store before the record becomes visible.
    async fn create_experiment(&self, req: CreateExperiment) -> Result<Experiment>;

    /// Fetches one experiment
    ///
    /// Returns `CompletionError::NotFound` when no record exists.
    async fn get_experiment(&self, key: &str) -> Result<Experiment>;

    /// Lists every experiment of a project, in no particular order
    async fn get_project_experiments(&self, project: &str) -> Result<Vec<Experiment>>;

    /// Removes an experiment record and its stored artifacts
    async fn delete_experiment(&self, key: &str) -> Result<()>;

    /// Resolves an artifact to a readable local path
    async fn get_artifact(&self, artifact: &Artifact) -> Result<PathBuf>;
}

/// File-backed experiment directory
///
/// Layout under `root`:
/// - `experiments/<key>.json` holds the record
/// - `artifacts/<key>/<tag>` holds artifact contents
///
/// Records are replaced atomically (write then rename), so a worker on the
/// same filesystem can update them while clients poll.
#[derive(Debug, Clone)]
pub struct FsExperimentDirectory {
    root: PathBuf,
}

impl FsExperimentDirectory {
    /// Opens (and creates if needed) a directory rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("experiments")).await?;
        fs::create_dir_all(root.join("artifacts")).await?;
        Ok(Self { root })
    }

    /// Updates the status of an experiment
    ///
    /// Used by workers. Moving to `running` stamps `started_at`; moving to a
    /// terminal status stamps `finished_at`.
    pub async fn set_status(&self, key: &str, status: ExperimentStatus) -> Result<Experiment> {
        let mut experiment = self.get_experiment(key).await?;
        let now = Utc::now();

        if status == ExperimentStatus::Running && experiment.started_at.is_none() {
            experiment.started_at = Some(now);
        }
        if status.is_terminal() {
            experiment.finished_at = Some(now);
        }
        experiment.status = status;

        self.write_record(&experiment).await?;
        debug!("Experiment {} is now {}", key, status);

        Ok(experiment)
    }

    /// Stores the contents of an artifact
    ///
    /// Used by workers to publish `retval`. The tag is added to the record if
    /// it was not declared at creation.
    pub async fn put_artifact(&self, key: &str, tag: &str, bytes: &[u8]) -> Result<PathBuf> {
        let mut experiment = self.get_experiment(key).await?;

        let store_key = artifact_key(key, tag);
        let path = self.artifact_path(&store_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        experiment
            .artifacts
            .entry(tag.to_string())
            .or_insert_with(Artifact::output)
            .key = Some(store_key);
        self.write_record(&experiment).await?;

        Ok(path)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join("experiments").join(format!("{}.json", key))
    }

    fn artifact_path(&self, store_key: &str) -> PathBuf {
        self.root.join("artifacts").join(store_key)
    }

    async fn write_record(&self, experiment: &Experiment) -> Result<()> {
        let path = self.record_path(&experiment.key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(experiment)
            .map_err(|e| CompletionError::Directory(format!("Failed to encode record: {}", e)))?;

        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn read_record(&self, path: &Path) -> Result<Experiment> {
        let body = fs::read(path).await?;
        serde_json::from_slice(&body).map_err(|e| {
            CompletionError::Directory(format!("Corrupt record {}: {}", path.display(), e))
        })
    }

    /// Copies immutable local inputs into the store and assigns store keys
    async fn capture_artifacts(&self, key: &str, experiment: &mut Experiment) -> Result<()> {
        for (tag, artifact) in experiment.artifacts.iter_mut() {
            let store_key = artifact_key(key, tag);

            if !artifact.mutable
                && let Some(local) = &artifact.local
            {
                let src = local.clone();
                let dst = self.artifact_path(&store_key);
                tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
                    .await
                    .map_err(io::Error::other)?
                    .map_err(|e| {
                        CompletionError::Directory(format!(
                            "Failed to capture artifact '{}' from {}: {}",
                            tag,
                            local.display(),
                            e
                        ))
                    })?;
            }

            artifact.key = Some(store_key);
        }

        Ok(())
    }
}

#[async_trait]
impl ExperimentDirectory for FsExperimentDirectory {
    async fn create_experiment(&self, req: CreateExperiment) -> Result<Experiment> {
        let mut experiment = Experiment {
            key: req.key.clone(),
            project: req.project,
            status: ExperimentStatus::Pending,
            entrypoint: req.entrypoint,
            entry_args: req.entry_args,
            artifacts: req.artifacts,
            resources_needed: req.resources_needed,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        if let Err(e) = self.capture_artifacts(&req.key, &mut experiment).await {
            let _ = fs::remove_dir_all(self.root.join("artifacts").join(&req.key)).await;
            return Err(e);
        }
        self.write_record(&experiment).await?;

        debug!(
            "Created experiment {} in project {}",
            experiment.key, experiment.project
        );

        Ok(experiment)
    }

    async fn get_experiment(&self, key: &str) -> Result<Experiment> {
        let path = self.record_path(key);
        match self.read_record(&path).await {
            Err(CompletionError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(CompletionError::NotFound(format!("experiment {}", key)))
            }
            other => other,
        }
    }

    async fn get_project_experiments(&self, project: &str) -> Result<Vec<Experiment>> {
        let mut entries = fs::read_dir(self.root.join("experiments")).await?;
        let mut experiments = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match self.read_record(&path).await {
                Ok(experiment) if experiment.project == project => experiments.push(experiment),
                Ok(_) => {}
                // Deleted between listing and reading
                Err(CompletionError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Ok(experiments)
    }

    async fn delete_experiment(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CompletionError::NotFound(format!("experiment {}", key)));
            }
            Err(e) => return Err(e.into()),
        }

        match fs::remove_dir_all(self.root.join("artifacts").join(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Deleted experiment {}", key);
        Ok(())
    }

    async fn get_artifact(&self, artifact: &Artifact) -> Result<PathBuf> {
        let store_key = artifact
            .key
            .as_deref()
            .ok_or_else(|| CompletionError::NotFound("artifact has no store key".to_string()))?;

        let path = self.artifact_path(store_key);
        if fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(CompletionError::NotFound(format!("artifact {}", store_key)))
        }
    }
}

fn artifact_key(experiment_key: &str, tag: &str) -> String {
    format!("{}/{}", experiment_key, tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::domain::artifact::tags;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn request(key: &str, project: &str, artifacts: BTreeMap<String, Artifact>) -> CreateExperiment {
        CreateExperiment {
            key: key.to_string(),
            project: project.to_string(),
            entrypoint: "completion_client".to_string(),
            entry_args: vec!["info".to_string()],
            artifacts,
            resources_needed: None,
        }
    }

    #[tokio::test]
    async fn test_create_captures_immutable_artifacts() {
        let store = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let script = inputs.path().join("task.py");
        std::fs::write(&script, "def main(args): return args").unwrap();

        let directory = FsExperimentDirectory::open(store.path()).await.unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(tags::CLIENTSCRIPT.to_string(), Artifact::immutable(&script));
        artifacts.insert(tags::RETVAL.to_string(), Artifact::output());

        let experiment = directory
            .create_experiment(request("p_1", "p", artifacts))
            .await
            .unwrap();

        assert_eq!(experiment.status, ExperimentStatus::Pending);
        let stored = directory
            .get_artifact(experiment.artifact(tags::CLIENTSCRIPT).unwrap())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(stored).unwrap(),
            "def main(args): return args"
        );

        // The result slot has a location but no contents yet
        let retval = experiment.artifact(tags::RETVAL).unwrap();
        assert_eq!(retval.key.as_deref(), Some("p_1/retval"));
        assert!(directory.get_artifact(retval).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_fails_for_missing_input() {
        let store = TempDir::new().unwrap();
        let directory = FsExperimentDirectory::open(store.path()).await.unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            tags::ARGS.to_string(),
            Artifact::immutable("/nonexistent/harvest/args.json"),
        );

        let err = directory
            .create_experiment(request("p_2", "p", artifacts))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Directory(_)));
        assert!(directory.get_experiment("p_2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_project_listing_filters_by_project() {
        let store = TempDir::new().unwrap();
        let directory = FsExperimentDirectory::open(store.path()).await.unwrap();

        for (key, project) in [("a_1", "a"), ("a_2", "a"), ("b_1", "b")] {
            directory
                .create_experiment(request(key, project, BTreeMap::new()))
                .await
                .unwrap();
        }

        let mut keys: Vec<String> = directory
            .get_project_experiments("a")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();

        assert_eq!(keys, vec!["a_1".to_string(), "a_2".to_string()]);
        assert!(directory.get_project_experiments("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_updates_are_visible() {
        let store = TempDir::new().unwrap();
        let directory = FsExperimentDirectory::open(store.path()).await.unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(tags::RETVAL.to_string(), Artifact::output());
        directory
            .create_experiment(request("p_3", "p", artifacts))
            .await
            .unwrap();

        let running = directory
            .set_status("p_3", ExperimentStatus::Running)
            .await
            .unwrap();
        assert!(running.started_at.is_some());
        assert!(running.finished_at.is_none());

        directory.put_artifact("p_3", tags::RETVAL, b"42").await.unwrap();
        let finished = directory
            .set_status("p_3", ExperimentStatus::Finished)
            .await
            .unwrap();
        assert!(finished.is_finished());
        assert!(finished.finished_at.is_some());

        let reloaded = directory.get_experiment("p_3").await.unwrap();
        let path = directory
            .get_artifact(reloaded.artifact(tags::RETVAL).unwrap())
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"42");
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_artifacts() {
        let store = TempDir::new().unwrap();
        let directory = FsExperimentDirectory::open(store.path()).await.unwrap();
        directory
            .create_experiment(request("p_4", "p", BTreeMap::new()))
            .await
            .unwrap();
        directory.put_artifact("p_4", tags::RETVAL, b"1").await.unwrap();

        directory.delete_experiment("p_4").await.unwrap();

        assert!(directory.get_experiment("p_4").await.unwrap_err().is_not_found());
        assert!(!store.path().join("artifacts/p_4").exists());
        assert!(directory.delete_experiment("p_4").await.unwrap_err().is_not_found());
    }
}
