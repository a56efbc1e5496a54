//! Experiment DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::artifact::Artifact;
use crate::domain::experiment::Experiment;
use crate::domain::resources::ResourceRequirements;

/// Request to create a durable experiment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperiment {
    pub key: String,
    pub project: String,
    pub entrypoint: String,
    pub entry_args: Vec<String>,
    pub artifacts: BTreeMap<String, Artifact>,
    pub resources_needed: Option<ResourceRequirements>,
}

/// Work descriptor handed to a queue transport
///
/// Only the key travels through the queue; workers load the record and its
/// artifacts from the experiment directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub experiment_key: String,
    pub project: String,
    pub queue_name: String,
    pub submitted_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn for_experiment(experiment: &Experiment, queue_name: &str) -> Self {
        Self {
            experiment_key: experiment.key.clone(),
            project: experiment.project.clone(),
            queue_name: queue_name.to_string(),
            submitted_at: Utc::now(),
        }
    }
}
