//! In-memory state store

use super::{ClusterSnapshot, ClusterUpdate, NodeUpdate, StateStore, Tables};
use crate::error::{ForgeError, Result};
use crate::model::{CloudCredential, Cluster, ClusterStatus, EdgeDevice, Node};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// State store kept entirely in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ForgeError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ForgeError::Lock("Failed to acquire write lock".to_string()))
    }

    /// Persist a new cluster with its nodes
    pub fn insert_cluster(&self, cluster: Cluster, nodes: Vec<Node>) -> Result<()> {
        self.write()?.insert_cluster(cluster, nodes)
    }

    /// Store a credential
    pub fn insert_credential(&self, credential: CloudCredential) -> Result<()> {
        self.write()?.insert_credential(credential);
        Ok(())
    }

    /// Delete a credential
    pub fn remove_credential(&self, credential_id: &str) -> Result<()> {
        self.write()?.remove_credential(credential_id)
    }

    /// Register an edge device
    pub fn insert_edge_device(&self, device: EdgeDevice) -> Result<()> {
        self.write()?.insert_edge_device(device);
        Ok(())
    }

    /// Read a single node
    pub fn node(&self, node_id: &str) -> Result<Node> {
        self.read()?
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .ok_or_else(|| ForgeError::NodeNotFound(node_id.to_string()))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot> {
        self.read()?.snapshot(cluster_id)
    }

    async fn update_node(&self, node_id: &str, update: NodeUpdate) -> Result<()> {
        self.write()?.update_node(node_id, update)
    }

    async fn update_cluster(&self, cluster_id: &str, update: ClusterUpdate) -> Result<()> {
        self.write()?.update_cluster(cluster_id, update)
    }

    async fn clusters_with_status(&self, status: ClusterStatus) -> Result<Vec<Cluster>> {
        Ok(self.read()?.clusters_with_status(status))
    }
}
