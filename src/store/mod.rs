//! Persisted cluster state
//!
//! The provisioning pipeline only ever talks to a [`StateStore`]: it reads a
//! cluster together with its nodes, credentials and edge devices, and writes
//! point updates keyed by primary identifier. Two stores ship with the
//! crate, an in-memory one for tests and embedding and a JSON file store
//! used by the CLI.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{ForgeError, Result};
use crate::model::{
    CloudCredential, Cluster, ClusterStatus, EdgeDevice, Node, NodeStatus, ProvisionStage,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A cluster with everything its nodes reference
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// The cluster row
    pub cluster: Cluster,
    /// Nodes in creation order
    pub nodes: Vec<Node>,
    /// Credentials referenced by the nodes, by ID
    pub credentials: HashMap<String, CloudCredential>,
    /// Edge devices referenced by the nodes, by ID
    pub edge_devices: HashMap<String, EdgeDevice>,
}

impl ClusterSnapshot {
    /// Nodes currently in the given status, in creation order
    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .cloned()
            .collect()
    }
}

/// Point update of a node row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub status: Option<NodeStatus>,
    pub machine_id: Option<String>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub last_error: Option<String>,
}

impl NodeUpdate {
    /// Update only the status
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Mark failed with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(NodeStatus::Failed),
            last_error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Record the provider instance ID
    pub fn machine_id(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            ..Default::default()
        }
    }

    /// Record addresses
    pub fn addresses(public_ip: impl Into<String>, private_ip: Option<String>) -> Self {
        Self {
            public_ip: Some(public_ip.into()),
            private_ip,
            ..Default::default()
        }
    }

    fn apply(self, node: &mut Node) {
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(machine_id) = self.machine_id {
            node.machine_id = Some(machine_id);
        }
        if let Some(public_ip) = self.public_ip {
            node.public_ip = Some(public_ip);
        }
        if let Some(private_ip) = self.private_ip {
            node.private_ip = Some(private_ip);
        }
        if let Some(last_error) = self.last_error {
            node.last_error = Some(last_error);
        }
        node.updated_at = Utc::now();
    }
}

/// Point update of a cluster row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterUpdate {
    pub status: Option<ClusterStatus>,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub provision_stage: Option<ProvisionStage>,
}

impl ClusterUpdate {
    /// Update only the status
    pub fn status(status: ClusterStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Record the completed stage
    pub fn stage(stage: ProvisionStage) -> Self {
        Self {
            provision_stage: Some(stage),
            ..Default::default()
        }
    }

    fn apply(self, cluster: &mut Cluster) {
        if let Some(status) = self.status {
            cluster.status = status;
        }
        if let Some(private_key) = self.private_key {
            cluster.private_key = Some(private_key);
        }
        if let Some(public_key) = self.public_key {
            cluster.public_key = Some(public_key);
        }
        if let Some(stage) = self.provision_stage {
            cluster.provision_stage = Some(stage);
        }
        cluster.updated_at = Utc::now();
    }
}

/// State store used by the provisioning pipeline
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a cluster with its nodes, credentials and edge devices
    async fn load_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot>;

    /// Update one node
    async fn update_node(&self, node_id: &str, update: NodeUpdate) -> Result<()>;

    /// Update one cluster
    async fn update_cluster(&self, cluster_id: &str, update: ClusterUpdate) -> Result<()>;

    /// List clusters in a status
    async fn clusters_with_status(&self, status: ClusterStatus) -> Result<Vec<Cluster>>;
}

/// Table set shared by the bundled stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    clusters: HashMap<String, Cluster>,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    credentials: HashMap<String, CloudCredential>,
    #[serde(default)]
    edge_devices: HashMap<String, EdgeDevice>,
}

impl Tables {
    fn snapshot(&self, cluster_id: &str) -> Result<ClusterSnapshot> {
        let cluster = self
            .clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| ForgeError::ClusterNotFound(cluster_id.to_string()))?;

        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.cluster_id == cluster_id)
            .cloned()
            .collect();

        let mut credentials = HashMap::new();
        let mut edge_devices = HashMap::new();
        for node in &nodes {
            if let Some(cred) = node
                .credential_id
                .as_ref()
                .and_then(|id| self.credentials.get(id))
            {
                credentials.insert(cred.id.clone(), cred.clone());
            }
            if let Some(device) = node
                .edge_device_id
                .as_ref()
                .and_then(|id| self.edge_devices.get(id))
            {
                edge_devices.insert(device.id.clone(), device.clone());
            }
        }

        Ok(ClusterSnapshot {
            cluster,
            nodes,
            credentials,
            edge_devices,
        })
    }

    fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| ForgeError::NodeNotFound(node_id.to_string()))?;
        update.apply(node);
        Ok(())
    }

    fn update_cluster(&mut self, cluster_id: &str, update: ClusterUpdate) -> Result<()> {
        let cluster = self
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| ForgeError::ClusterNotFound(cluster_id.to_string()))?;
        update.apply(cluster);
        Ok(())
    }

    fn clusters_with_status(&self, status: ClusterStatus) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self
            .clusters
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        clusters.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        clusters
    }

    fn insert_cluster(&mut self, cluster: Cluster, nodes: Vec<Node>) -> Result<()> {
        if self.clusters.contains_key(&cluster.id) {
            return Err(ForgeError::Store(format!(
                "cluster {} already exists",
                cluster.id
            )));
        }
        if let Some(stray) = nodes.iter().find(|n| n.cluster_id != cluster.id) {
            return Err(ForgeError::Store(format!(
                "node {} does not belong to cluster {}",
                stray.id, cluster.id
            )));
        }
        self.clusters.insert(cluster.id.clone(), cluster);
        self.nodes.extend(nodes);
        Ok(())
    }

    fn insert_credential(&mut self, credential: CloudCredential) {
        self.credentials.insert(credential.id.clone(), credential);
    }

    fn remove_credential(&mut self, credential_id: &str) -> Result<()> {
        self.credentials
            .remove(credential_id)
            .map(|_| ())
            .ok_or_else(|| ForgeError::CredentialNotFound(credential_id.to_string()))
    }

    fn insert_edge_device(&mut self, device: EdgeDevice) {
        self.edge_devices.insert(device.id.clone(), device);
    }

    fn credentials(&self) -> Vec<CloudCredential> {
        self.credentials.values().cloned().collect()
    }

    fn edge_devices(&self) -> Vec<EdgeDevice> {
        self.edge_devices.values().cloned().collect()
    }
}
