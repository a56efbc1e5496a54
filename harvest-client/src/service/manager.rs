//! Completion service manager
//!
//! Keeps one session per experiment id so callers can fan work out over
//! several groups without tracking sessions themselves.

use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use tracing::{info, warn};

use super::completion::CompletionService;
use crate::config::Config;
use crate::error::Result;
use crate::repository::Backends;

pub struct CompletionServiceManager {
    config: Config,
    backends: Backends,
    services: HashMap<String, CompletionService>,
}

impl CompletionServiceManager {
    pub fn new(config: Config, backends: Backends) -> Self {
        Self {
            config,
            backends,
            services: HashMap::new(),
        }
    }

    /// Submits a task to the session of `experiment_id`
    ///
    /// The session is started on first use with the manager's config.
    pub async fn submit_task<A>(
        &mut self,
        experiment_id: &str,
        client_code: impl AsRef<Path>,
        args: &A,
    ) -> Result<String>
    where
        A: Serialize + ?Sized,
    {
        self.service_or_start(experiment_id)
            .await?
            .submit(client_code, args)
            .await
    }

    /// Session of `experiment_id`, if one was started
    pub fn service_mut(&mut self, experiment_id: &str) -> Option<&mut CompletionService> {
        self.services.get_mut(experiment_id)
    }

    /// Ids with a running session, sorted
    pub fn experiment_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Closes every session and returns the first error
    pub async fn close(self) -> Result<()> {
        let mut first_error = None;

        for (experiment_id, service) in self.services {
            if let Err(e) = service.close().await {
                warn!("Failed to close session {}: {}", experiment_id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn service_or_start(&mut self, experiment_id: &str) -> Result<&mut CompletionService> {
        match self.services.entry(experiment_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                info!("Starting session for {}", experiment_id);
                let service = CompletionService::start(
                    experiment_id,
                    self.config.clone(),
                    self.backends.clone(),
                )
                .await?;
                Ok(entry.insert(service))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harvest_core::domain::cloud::CloudKind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    use crate::error::CompletionError;
    use crate::repository::{
        ExperimentDirectory, FsExperimentDirectory, SpoolTransports, WorkerPool, WorkerRequest,
    };

    #[derive(Default)]
    struct CountingPool {
        queues: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkerPool for CountingPool {
        async fn start_workers(&self, request: &WorkerRequest) -> Result<()> {
            self.queues.lock().unwrap().push(request.queue_name.clone());
            Ok(())
        }
    }

    struct Setup {
        root: TempDir,
        directory: Arc<FsExperimentDirectory>,
        pool: Arc<CountingPool>,
    }

    async fn setup() -> Setup {
        let root = TempDir::new().unwrap();
        let directory = FsExperimentDirectory::open(root.path().join("store"))
            .await
            .unwrap();
        std::fs::write(root.path().join("task.py"), "pass").unwrap();
        Setup {
            root,
            directory: Arc::new(directory),
            pool: Arc::new(CountingPool::default()),
        }
    }

    fn manager(setup: &Setup) -> CompletionServiceManager {
        let config = Config::default()
            .with_cloud(CloudKind::GCSpot)
            .with_scratch_dir(setup.root.path().join("scratch"));
        let backends = Backends::new(
            setup.directory.clone(),
            Arc::new(SpoolTransports::new(setup.root.path().join("queues"))),
        )
        .with_workers(setup.pool.clone());
        CompletionServiceManager::new(config, backends)
    }

    #[tokio::test]
    async fn test_one_session_per_experiment_id() {
        let setup = setup().await;
        let mut manager = manager(&setup);
        let script = setup.root.path().join("task.py");

        let a1 = manager.submit_task("a", &script, &json!(1)).await.unwrap();
        manager.submit_task("a", &script, &json!(2)).await.unwrap();
        let b1 = manager.submit_task("b", &script, &json!(3)).await.unwrap();

        assert_eq!(manager.experiment_ids(), vec!["a", "b"]);
        assert_eq!(
            *setup.pool.queues.lock().unwrap(),
            vec!["pubsub_a".to_string(), "pubsub_b".to_string()]
        );
        assert!(a1.starts_with("completion_service_a_"));
        assert!(b1.starts_with("completion_service_b_"));
        assert_eq!(manager.service_mut("a").unwrap().pending(), 2);
        assert!(manager.service_mut("c").is_none());

        manager.close().await.unwrap();
        assert!(!setup.root.path().join("queues/pubsub_a").exists());
        assert!(!setup.root.path().join("queues/pubsub_b").exists());
    }

    #[tokio::test]
    async fn test_results_through_managed_session() {
        let setup = setup().await;
        let mut manager = manager(&setup);
        let script = setup.root.path().join("task.py");

        let key = manager.submit_task("a", &script, &json!("x")).await.unwrap();
        setup
            .directory
            .put_artifact(&key, "retval", b"\"y\"")
            .await
            .unwrap();
        setup
            .directory
            .set_status(&key, harvest_core::domain::experiment::ExperimentStatus::Finished)
            .await
            .unwrap();

        let service = manager.service_mut("a").unwrap();
        let result: Option<(String, String)> = service.get_results(false).await.unwrap();
        assert_eq!(result, Some((key.clone(), "y".to_string())));
        assert!(setup.directory.get_experiment(&key).await.is_ok());

        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_is_not_registered() {
        let setup = setup().await;
        let config = Config::default().with_cloud(CloudKind::Ec2);
        let backends = Backends::new(
            setup.directory.clone(),
            Arc::new(SpoolTransports::new(setup.root.path().join("queues"))),
        );
        let mut manager = CompletionServiceManager::new(config, backends);

        let err = manager
            .submit_task("a", setup.root.path().join("task.py"), &json!(1))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Provisioning(_)));
        assert!(manager.experiment_ids().is_empty());
        manager.close().await.unwrap();
    }
}
