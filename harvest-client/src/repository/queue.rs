//! Queue transports
//!
//! A queue transport carries experiment descriptors from the submitting
//! client to the workers. The concrete transport is chosen once per session
//! from the configured `TransportKind`.

use async_trait::async_trait;
use harvest_core::domain::cloud::TransportKind;
use harvest_core::domain::experiment::Experiment;
use harvest_core::dto::experiment::QueueMessage;
use reqwest::Client;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{CompletionError, Result};

/// A named channel accepting work descriptors
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Name of the queue
    fn name(&self) -> &str;

    /// Transport family of the queue
    fn kind(&self) -> TransportKind;

    /// Dispatches experiment records to the workers listening on this queue
    async fn submit(&self, experiments: &[Experiment]) -> Result<()>;

    /// Releases the queue
    async fn delete(&self) -> Result<()>;
}

/// Opens queue transports by name and kind
pub trait TransportFactory: Send + Sync {
    fn open(&self, queue_name: &str, kind: TransportKind) -> Result<Box<dyn QueueTransport>>;
}

// =============================================================================
// Spool transport
// =============================================================================

/// Directory-spool queue
///
/// Each submitted experiment becomes one JSON `QueueMessage` file in
/// `<root>/<queue_name>/`. Workers claim messages by renaming or removing
/// the files.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    name: String,
    kind: TransportKind,
    dir: PathBuf,
}

impl SpoolQueue {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>, kind: TransportKind) -> Self {
        let name = name.into();
        let dir = root.into().join(&name);
        Self { name, kind, dir }
    }

    /// Reads the pending messages, oldest first
    pub async fn pending(&self) -> Result<Vec<QueueMessage>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let body = fs::read(&path).await?;
            let message: QueueMessage = serde_json::from_slice(&body).map_err(|e| {
                CompletionError::Transport(format!("Corrupt message {}: {}", path.display(), e))
            })?;
            messages.push(message);
        }

        messages.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(messages)
    }
}

#[async_trait]
impl QueueTransport for SpoolQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn submit(&self, experiments: &[Experiment]) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            CompletionError::Transport(format!("Failed to open queue {}: {}", self.name, e))
        })?;

        for experiment in experiments {
            let message = QueueMessage::for_experiment(experiment, &self.name);
            let body = serde_json::to_vec(&message)
                .map_err(|e| CompletionError::Transport(format!("Failed to encode message: {}", e)))?;

            let path = self.dir.join(format!("{}.json", experiment.key));
            let tmp = self.dir.join(format!("{}.json.tmp", experiment.key));
            fs::write(&tmp, body).await.map_err(|e| {
                CompletionError::Transport(format!("Failed to enqueue {}: {}", experiment.key, e))
            })?;
            fs::rename(&tmp, &path).await.map_err(|e| {
                CompletionError::Transport(format!("Failed to enqueue {}: {}", experiment.key, e))
            })?;

            debug!("Enqueued {} on {}", experiment.key, self.name);
        }

        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!("Deleted queue {}", self.name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CompletionError::Transport(format!(
                "Failed to delete queue {}: {}",
                self.name, e
            ))),
        }
    }
}

/// Opens a `SpoolQueue` for every kind
///
/// Useful on a single machine and in tests, where pub/sub and SQS queues
/// are simulated by spool directories.
#[derive(Debug, Clone)]
pub struct SpoolTransports {
    root: PathBuf,
}

impl SpoolTransports {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TransportFactory for SpoolTransports {
    fn open(&self, queue_name: &str, kind: TransportKind) -> Result<Box<dyn QueueTransport>> {
        Ok(Box::new(SpoolQueue::new(self.root.clone(), queue_name, kind)))
    }
}

// =============================================================================
// Gateway transport
// =============================================================================

/// Queue reached through an HTTP gateway in front of pub/sub or SQS
#[derive(Debug, Clone)]
pub struct HttpQueue {
    name: String,
    kind: TransportKind,
    base_url: String,
    client: Client,
}

impl HttpQueue {
    /// Creates a gateway queue
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the gateway (e.g., "http://localhost:8090")
    /// * `name` - Queue name
    /// * `kind` - Transport family served by the gateway
    pub fn new(base_url: impl Into<String>, name: impl Into<String>, kind: TransportKind) -> Self {
        Self::with_client(base_url, name, kind, Client::new())
    }

    /// Creates a gateway queue with a configured reqwest client
    pub fn with_client(
        base_url: impl Into<String>,
        name: impl Into<String>,
        kind: TransportKind,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn queue_url(&self) -> String {
        format!("{}/api/queues/{}", self.base_url, self.name)
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.queue_url())
    }

    /// Checks the status code and turns failures into `ApiError`
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl QueueTransport for HttpQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn submit(&self, experiments: &[Experiment]) -> Result<()> {
        let messages: Vec<QueueMessage> = experiments
            .iter()
            .map(|e| QueueMessage::for_experiment(e, &self.name))
            .collect();

        let response = self
            .client
            .post(self.messages_url())
            .json(&messages)
            .send()
            .await?;

        self.handle_empty_response(response).await?;
        debug!("Published {} message(s) to {}", messages.len(), self.name);

        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let response = self.client.delete(self.queue_url()).send().await?;

        match self.handle_empty_response(response).await {
            Ok(()) => {
                info!("Deleted queue {}", self.name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Default selection
// =============================================================================

/// Local queues spool to disk; pub/sub and SQS queues go through a gateway
#[derive(Debug, Clone)]
pub struct DefaultTransports {
    spool_root: PathBuf,
    gateway_url: Option<String>,
    client: Client,
}

impl DefaultTransports {
    pub fn new(spool_root: impl Into<PathBuf>, gateway_url: Option<String>) -> Self {
        Self {
            spool_root: spool_root.into(),
            gateway_url,
            client: Client::new(),
        }
    }
}

impl TransportFactory for DefaultTransports {
    fn open(&self, queue_name: &str, kind: TransportKind) -> Result<Box<dyn QueueTransport>> {
        match (kind, &self.gateway_url) {
            (TransportKind::Local, _) => Ok(Box::new(SpoolQueue::new(
                self.spool_root.clone(),
                queue_name,
                kind,
            ))),
            (_, Some(url)) => Ok(Box::new(HttpQueue::with_client(
                url.clone(),
                queue_name,
                kind,
                self.client.clone(),
            ))),
            (_, None) => Err(CompletionError::Config(format!(
                "{} queue {} needs a gateway URL",
                kind, queue_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use harvest_core::domain::experiment::ExperimentStatus;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn experiment(key: &str) -> Experiment {
        Experiment {
            key: key.to_string(),
            project: "completion_service_exp1".to_string(),
            status: ExperimentStatus::Pending,
            entrypoint: "completion_client".to_string(),
            entry_args: vec![],
            artifacts: BTreeMap::new(),
            resources_needed: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_spool_submit_and_delete() {
        let root = TempDir::new().unwrap();
        let queue = SpoolQueue::new(root.path(), "sqs_exp1", TransportKind::Sqs);

        queue
            .submit(&[experiment("e_1"), experiment("e_2")])
            .await
            .unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|m| m.queue_name == "sqs_exp1"));
        assert!(root.path().join("sqs_exp1/e_1.json").is_file());

        queue.delete().await.unwrap();
        assert!(!root.path().join("sqs_exp1").exists());
        assert!(queue.pending().await.unwrap().is_empty());

        // Deleting twice is harmless
        queue.delete().await.unwrap();
    }

    #[test]
    fn test_http_queue_urls() {
        let queue = HttpQueue::new("http://gateway:8090/", "pubsub_exp1", TransportKind::PubSub);
        assert_eq!(queue.queue_url(), "http://gateway:8090/api/queues/pubsub_exp1");
        assert_eq!(
            queue.messages_url(),
            "http://gateway:8090/api/queues/pubsub_exp1/messages"
        );
        assert_eq!(queue.kind(), TransportKind::PubSub);
    }

    #[test]
    fn test_default_transports_selection() {
        let root = TempDir::new().unwrap();

        let without_gateway = DefaultTransports::new(root.path(), None);
        let local = without_gateway.open("local", TransportKind::Local).unwrap();
        assert_eq!(local.kind(), TransportKind::Local);
        assert!(matches!(
            without_gateway.open("sqs_exp1", TransportKind::Sqs),
            Err(CompletionError::Config(_))
        ));

        let with_gateway =
            DefaultTransports::new(root.path(), Some("http://localhost:8090".to_string()));
        let remote = with_gateway.open("sqs_exp1", TransportKind::Sqs).unwrap();
        assert_eq!(remote.name(), "sqs_exp1");
        assert_eq!(remote.kind(), TransportKind::Sqs);
    }
}
