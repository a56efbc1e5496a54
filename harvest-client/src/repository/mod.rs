//! Repository layer
//!
//! Repositories abstract the collaborators of the completion service: the
//! experiment directory, the queue transports and the worker backends.
//! They carry no submission or polling logic.
//!
//! All collaborators are trait-based so sessions can run against local,
//! remote or test implementations.

mod directory;
mod queue;
mod workers;

use std::sync::Arc;

// Re-export traits
pub use directory::ExperimentDirectory;
pub use queue::{QueueTransport, TransportFactory};
pub use workers::WorkerPool;

// Re-export implementations
pub use directory::FsExperimentDirectory;
pub use queue::{DefaultTransports, HttpQueue, SpoolQueue, SpoolTransports};
pub use workers::{HttpWorkerPool, LocalWorker, WorkerRequest};

/// Collaborators a session is built from
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn ExperimentDirectory>,
    pub transports: Arc<dyn TransportFactory>,
    /// Required for every cloud other than local
    pub workers: Option<Arc<dyn WorkerPool>>,
}

impl Backends {
    pub fn new(
        directory: Arc<dyn ExperimentDirectory>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            directory,
            transports,
            workers: None,
        }
    }

    pub fn with_workers(mut self, workers: Arc<dyn WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }
}
