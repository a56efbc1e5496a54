//! Experiment domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::artifact::Artifact;
use super::resources::ResourceRequirements;

/// Durable record of one submitted unit of work
///
/// Created by the completion service, updated by workers, and observed by
/// polling the experiment directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub key: String,
    pub project: String,
    pub status: ExperimentStatus,

    /// Script run by the worker to invoke the client code
    pub entrypoint: String,
    pub entry_args: Vec<String>,

    /// Artifacts by tag
    pub artifacts: BTreeMap<String, Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_needed: Option<ResourceRequirements>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn is_finished(&self) -> bool {
        self.status == ExperimentStatus::Finished
    }

    /// Looks up an artifact by tag
    pub fn artifact(&self, tag: &str) -> Option<&Artifact> {
        self.artifacts.get(tag)
    }
}

/// Experiment execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl ExperimentStatus {
    /// Finished and failed experiments never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Finished | ExperimentStatus::Failed)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentStatus::Pending => write!(f, "pending"),
            ExperimentStatus::Running => write!(f, "running"),
            ExperimentStatus::Finished => write!(f, "finished"),
            ExperimentStatus::Failed => write!(f, "failed"),
        }
    }
}
