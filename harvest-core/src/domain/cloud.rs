//! Deployment target selection
//!
//! A `CloudKind` says where workers run. It is resolved once into a
//! `TransportKind`, which decides how the queue for an experiment group
//! is named and which transport carries it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the workers for a session run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudKind {
    /// A single worker process on this machine
    #[default]
    Local,
    /// Google Cloud on-demand instances
    GCloud,
    /// Google Cloud preemptible instances
    GCSpot,
    /// EC2 on-demand instances
    Ec2,
    /// EC2 spot instances
    Ec2Spot,
}

impl CloudKind {
    /// Queue transport used by this deployment target
    pub fn transport(&self) -> TransportKind {
        match self {
            CloudKind::Local => TransportKind::Local,
            CloudKind::GCloud | CloudKind::GCSpot => TransportKind::PubSub,
            CloudKind::Ec2 | CloudKind::Ec2Spot => TransportKind::Sqs,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, CloudKind::Local)
    }

    /// Whether instances are bought on the spot/preemptible market
    pub fn is_spot(&self) -> bool {
        matches!(self, CloudKind::GCSpot | CloudKind::Ec2Spot)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudKind::Local => "local",
            CloudKind::GCloud => "gcloud",
            CloudKind::GCSpot => "gcspot",
            CloudKind::Ec2 => "ec2",
            CloudKind::Ec2Spot => "ec2spot",
        }
    }
}

impl fmt::Display for CloudKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(CloudKind::Local),
            "gcloud" => Ok(CloudKind::GCloud),
            "gcspot" => Ok(CloudKind::GCSpot),
            "ec2" => Ok(CloudKind::Ec2),
            "ec2spot" => Ok(CloudKind::Ec2Spot),
            other => Err(format!(
                "unknown cloud '{}' (expected local, gcloud, gcspot, ec2 or ec2spot)",
                other
            )),
        }
    }
}

/// Queue transport family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Shared local queue
    Local,
    /// Pub/Sub topic per experiment group
    PubSub,
    /// SQS queue per experiment group
    Sqs,
}

impl TransportKind {
    /// Name of the queue serving `experiment_id`
    ///
    /// The local queue is shared by every group and is never deleted.
    pub fn queue_name(&self, experiment_id: &str) -> String {
        match self {
            TransportKind::Local => "local".to_string(),
            TransportKind::PubSub => format!("pubsub_{}", experiment_id),
            TransportKind::Sqs => format!("sqs_{}", experiment_id),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, TransportKind::Local)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::PubSub => write!(f, "pubsub"),
            TransportKind::Sqs => write!(f, "sqs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_for_each_cloud() {
        assert_eq!(CloudKind::Local.transport(), TransportKind::Local);
        assert_eq!(CloudKind::GCloud.transport(), TransportKind::PubSub);
        assert_eq!(CloudKind::GCSpot.transport(), TransportKind::PubSub);
        assert_eq!(CloudKind::Ec2.transport(), TransportKind::Sqs);
        assert_eq!(CloudKind::Ec2Spot.transport(), TransportKind::Sqs);
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(TransportKind::Local.queue_name("exp1"), "local");
        assert_eq!(TransportKind::PubSub.queue_name("exp1"), "pubsub_exp1");
        assert_eq!(TransportKind::Sqs.queue_name("exp1"), "sqs_exp1");
    }

    #[test]
    fn test_parse_cloud_kind() {
        assert_eq!("local".parse::<CloudKind>().unwrap(), CloudKind::Local);
        assert_eq!("EC2SPOT".parse::<CloudKind>().unwrap(), CloudKind::Ec2Spot);
        assert_eq!(" gcspot ".parse::<CloudKind>().unwrap(), CloudKind::GCSpot);
        assert!("azure".parse::<CloudKind>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for kind in [
            CloudKind::Local,
            CloudKind::GCloud,
            CloudKind::GCSpot,
            CloudKind::Ec2,
            CloudKind::Ec2Spot,
        ] {
            assert_eq!(kind.to_string().parse::<CloudKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_spot_kinds() {
        assert!(CloudKind::Ec2Spot.is_spot());
        assert!(CloudKind::GCSpot.is_spot());
        assert!(!CloudKind::Ec2.is_spot());
        assert!(!CloudKind::Local.is_spot());
    }
}
