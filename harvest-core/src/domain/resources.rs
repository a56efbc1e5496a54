//! Resource requirements used for scheduling experiments

use serde::{Deserialize, Serialize};

/// Compute resources an experiment asks for
///
/// Sizes such as `ram` and `hdd` are kept as strings ("8g", "60g") and are
/// interpreted by the worker pool backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdd: Option<String>,
}
