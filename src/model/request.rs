//! Declarative cluster requests

use super::{Cluster, ClusterSoftware, EdgeDevice, Node, Provider};
use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};

/// A cluster as requested by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    /// Cluster name, also the prefix of cloud node names
    pub name: String,
    /// Software to install
    pub software: ClusterSoftware,
    /// Credential used by cloud nodes that do not name their own
    #[serde(default)]
    pub credential_id: Option<String>,
    /// Cloud VMs to launch
    #[serde(default)]
    pub cloud_nodes: Vec<CloudNodeRequest>,
    /// Registered edge devices to include
    #[serde(default)]
    pub edge_device_ids: Vec<String>,
}

/// One requested cloud VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudNodeRequest {
    /// AWS or GCP
    pub provider: Provider,
    /// Instance or machine type
    pub instance_type: String,
    /// Runs the control plane
    #[serde(default)]
    pub is_master: bool,
    /// Credential override for this node
    #[serde(default)]
    pub credential_id: Option<String>,
}

impl ClusterRequest {
    /// Parse a request from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Cluster and node rows for this request, all PENDING
    ///
    /// `devices` are the edge devices the user may select from.
    pub fn build(&self, user_id: &str, devices: &[EdgeDevice]) -> Result<(Cluster, Vec<Node>)> {
        if self.cloud_nodes.is_empty() && self.edge_device_ids.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "select at least one cloud node or edge device".to_string(),
            ));
        }

        let cluster = Cluster::new(user_id, &self.name, self.software);
        let mut nodes = Vec::with_capacity(self.cloud_nodes.len() + self.edge_device_ids.len());

        for (idx, spec) in self.cloud_nodes.iter().enumerate() {
            if !spec.provider.is_cloud() {
                return Err(ForgeError::InvalidConfig(format!(
                    "cloud node {} must use AWS or GCP",
                    idx
                )));
            }
            let mut node = Node::cloud(
                &cluster.id,
                &format!("{}-cloud-{}", self.name, idx),
                spec.provider,
                &spec.instance_type,
                "",
                spec.is_master,
            );
            node.credential_id = spec
                .credential_id
                .clone()
                .or_else(|| self.credential_id.clone());
            nodes.push(node);
        }

        for device_id in &self.edge_device_ids {
            let device = devices
                .iter()
                .find(|d| &d.id == device_id && d.user_id == user_id)
                .ok_or_else(|| ForgeError::EdgeDeviceNotFound(device_id.clone()))?;
            let mut node = Node::edge(&cluster.id, &device.name, &device.id);
            node.private_ip = Some(device.ip_address.clone());
            nodes.push(node);
        }

        Ok((cluster, nodes))
    }
}
