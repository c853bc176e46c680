//! Cluster records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Software installed across a cluster's nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterSoftware {
    /// Docker Swarm
    #[serde(alias = "DOCKER_SWARM")]
    Swarm,
    /// Lightweight Kubernetes
    K3s,
    /// Upstream Kubernetes
    Kubernetes,
    /// HashiCorp Nomad
    Nomad,
}

impl std::fmt::Display for ClusterSoftware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterSoftware::Swarm => write!(f, "SWARM"),
            ClusterSoftware::K3s => write!(f, "K3S"),
            ClusterSoftware::Kubernetes => write!(f, "KUBERNETES"),
            ClusterSoftware::Nomad => write!(f, "NOMAD"),
        }
    }
}

impl std::str::FromStr for ClusterSoftware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SWARM" | "DOCKER_SWARM" => Ok(ClusterSoftware::Swarm),
            "K3S" => Ok(ClusterSoftware::K3s),
            "KUBERNETES" => Ok(ClusterSoftware::Kubernetes),
            "NOMAD" => Ok(ClusterSoftware::Nomad),
            other => Err(format!("unknown cluster software: {}", other)),
        }
    }
}

/// Cluster lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterStatus {
    /// Waiting for provisioning to finish
    #[default]
    Pending,
    /// Provisioning finished
    Active,
    /// Teardown requested
    Deleting,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Pending => write!(f, "PENDING"),
            ClusterStatus::Active => write!(f, "ACTIVE"),
            ClusterStatus::Deleting => write!(f, "DELETING"),
        }
    }
}

/// Last pipeline stage completed for a cluster
///
/// Ordered so a resumed run can skip every stage up to and including the
/// recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStage {
    Launch,
    Network,
    Bootstrap,
}

impl std::fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionStage::Launch => write!(f, "launch"),
            ProvisionStage::Network => write!(f, "network"),
            ProvisionStage::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

/// A requested cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Cluster name
    pub name: String,
    /// Software to bootstrap
    pub software: ClusterSoftware,
    /// Lifecycle status
    pub status: ClusterStatus,
    /// Private key for every remote session against this cluster's nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Public half of `private_key`, as an authorized_keys line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Last completed pipeline stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_stage: Option<ProvisionStage>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Create a new pending cluster
    pub fn new(user_id: &str, name: &str, software: ClusterSoftware) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            software,
            status: ClusterStatus::Pending,
            private_key: None,
            public_key: None,
            provision_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether a stage already completed in an earlier run
    pub fn stage_done(&self, stage: ProvisionStage) -> bool {
        self.provision_stage.map(|done| done >= stage).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cluster_is_pending() {
        let cluster = Cluster::new("user-1", "demo", ClusterSoftware::Swarm);
        assert_eq!(cluster.status, ClusterStatus::Pending);
        assert!(cluster.private_key.is_none());
        assert!(cluster.provision_stage.is_none());
    }

    #[test]
    fn test_stage_done_ordering() {
        let mut cluster = Cluster::new("user-1", "demo", ClusterSoftware::K3s);
        assert!(!cluster.stage_done(ProvisionStage::Launch));

        cluster.provision_stage = Some(ProvisionStage::Network);
        assert!(cluster.stage_done(ProvisionStage::Launch));
        assert!(cluster.stage_done(ProvisionStage::Network));
        assert!(!cluster.stage_done(ProvisionStage::Bootstrap));
    }

    #[test]
    fn test_software_parse() {
        assert_eq!("k3s".parse::<ClusterSoftware>().unwrap(), ClusterSoftware::K3s);
        assert_eq!(
            "DOCKER_SWARM".parse::<ClusterSoftware>().unwrap(),
            ClusterSoftware::Swarm
        );
        assert!("mesos".parse::<ClusterSoftware>().is_err());
    }
}
