//! Node records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a node comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    /// Amazon EC2
    Aws,
    /// Google Compute Engine
    Gcp,
    /// Pre-registered physical device
    Edge,
}

impl Provider {
    /// Check if the node is a rented cloud VM
    pub fn is_cloud(&self) -> bool {
        matches!(self, Provider::Aws | Provider::Gcp)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Aws => write!(f, "AWS"),
            Provider::Gcp => write!(f, "GCP"),
            Provider::Edge => write!(f, "EDGE"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(Provider::Aws),
            "GCP" => Ok(Provider::Gcp),
            "EDGE" => Ok(Provider::Edge),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Node provisioning status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    /// Not yet touched by the pipeline
    #[default]
    Pending,
    /// Launched, waiting for network and bootstrap
    Provisioning,
    /// Bootstrapped
    Active,
    /// Gave up on this node
    Failed,
}

impl NodeStatus {
    /// Check if the node reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Failed)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "PENDING"),
            NodeStatus::Provisioning => write!(f, "PROVISIONING"),
            NodeStatus::Active => write!(f, "ACTIVE"),
            NodeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Role of a node for software that separates control plane and workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

/// One compute unit of a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node ID
    pub id: String,
    /// Owning cluster
    pub cluster_id: String,
    /// Node name, also used as the instance tag
    pub name: String,
    /// Node source
    pub provider: Provider,
    /// Provisioning status
    pub status: NodeStatus,
    /// Runs the control plane
    pub is_master: bool,
    /// Instance type (AWS) or machine type (GCP)
    pub instance_type: String,
    /// Cloud credential, required for AWS and GCP
    #[serde(default)]
    pub credential_id: Option<String>,
    /// Edge device, required for EDGE
    #[serde(default)]
    pub edge_device_id: Option<String>,
    /// Provider-assigned instance identifier
    #[serde(default)]
    pub machine_id: Option<String>,
    /// Externally reachable address
    #[serde(default)]
    pub public_ip: Option<String>,
    /// Internal address
    #[serde(default)]
    pub private_ip: Option<String>,
    /// Why the node failed, if it did
    #[serde(default)]
    pub last_error: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Node {
    fn blank(cluster_id: &str, name: &str, provider: Provider, instance_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cluster_id: cluster_id.to_string(),
            name: name.to_string(),
            provider,
            status: NodeStatus::Pending,
            is_master: false,
            instance_type: instance_type.to_string(),
            credential_id: None,
            edge_device_id: None,
            machine_id: None,
            public_ip: None,
            private_ip: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a cloud node backed by a credential
    pub fn cloud(
        cluster_id: &str,
        name: &str,
        provider: Provider,
        instance_type: &str,
        credential_id: &str,
        is_master: bool,
    ) -> Self {
        let mut node = Self::blank(cluster_id, name, provider, instance_type);
        node.credential_id = Some(credential_id.to_string());
        node.is_master = is_master;
        node
    }

    /// Create a node for a registered edge device
    pub fn edge(cluster_id: &str, name: &str, edge_device_id: &str) -> Self {
        let mut node = Self::blank(cluster_id, name, Provider::Edge, "edge-custom");
        node.edge_device_id = Some(edge_device_id.to_string());
        node
    }

    /// Role used to select install commands
    pub fn role(&self) -> NodeRole {
        if self.is_master {
            NodeRole::Master
        } else {
            NodeRole::Worker
        }
    }
}
