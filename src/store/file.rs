//! JSON file state store
//!
//! Keeps every table in one `state.json` document under the store root.
//! Each mutation rewrites the document through a temporary file and a
//! rename, so a crash never leaves a half-written state behind.

use super::{ClusterSnapshot, ClusterUpdate, NodeUpdate, StateStore, Tables};
use crate::error::Result;
use crate::model::{CloudCredential, Cluster, ClusterStatus, EdgeDevice, Node};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const STATE_FILE: &str = "state.json";

/// State store persisted as a JSON document
pub struct FileStore {
    /// Root directory
    root: PathBuf,
    /// Loaded tables, guarded across the write-back
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Open (or create) a store under `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let path = root.join(STATE_FILE);
        let tables = if fs::try_exists(&path).await? {
            let content = fs::read(&path).await?;
            serde_json::from_slice(&content)?
        } else {
            Tables::default()
        };

        tracing::debug!("Opened state store at {}", root.display());

        Ok(Self {
            root,
            tables: Mutex::new(tables),
        })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let content = serde_json::to_vec_pretty(tables)?;
        let tmp = self.root.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, self.root.join(STATE_FILE)).await?;
        Ok(())
    }

    /// Persist a new cluster with its nodes
    pub async fn insert_cluster(&self, cluster: Cluster, nodes: Vec<Node>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.insert_cluster(cluster, nodes)?;
        self.persist(&tables).await
    }

    /// Store a credential
    pub async fn insert_credential(&self, credential: CloudCredential) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.insert_credential(credential);
        self.persist(&tables).await
    }

    /// Delete a credential
    pub async fn remove_credential(&self, credential_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.remove_credential(credential_id)?;
        self.persist(&tables).await
    }

    /// Register an edge device
    pub async fn insert_edge_device(&self, device: EdgeDevice) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.insert_edge_device(device);
        self.persist(&tables).await
    }

    /// List stored credentials
    pub async fn credentials(&self) -> Vec<CloudCredential> {
        self.tables.lock().await.credentials()
    }

    /// List registered edge devices
    pub async fn edge_devices(&self) -> Vec<EdgeDevice> {
        self.tables.lock().await.edge_devices()
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot> {
        self.tables.lock().await.snapshot(cluster_id)
    }

    async fn update_node(&self, node_id: &str, update: NodeUpdate) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.update_node(node_id, update)?;
        self.persist(&tables).await
    }

    async fn update_cluster(&self, cluster_id: &str, update: ClusterUpdate) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.update_cluster(cluster_id, update)?;
        self.persist(&tables).await
    }

    async fn clusters_with_status(&self, status: ClusterStatus) -> Result<Vec<Cluster>> {
        Ok(self.tables.lock().await.clusters_with_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterSoftware, NodeStatus};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp = tempdir().unwrap();
        let cluster = Cluster::new("u1", "edge-only", ClusterSoftware::Swarm);
        let device = EdgeDevice::new("u1", "pi-1", "192.168.1.20", "pi");
        let node = Node::edge(&cluster.id, "pi-1", &device.id);
        let node_id = node.id.clone();

        {
            let store = FileStore::open(temp.path()).await.unwrap();
            store.insert_edge_device(device.clone()).await.unwrap();
            store.insert_cluster(cluster.clone(), vec![node]).await.unwrap();
            store
                .update_node(&node_id, NodeUpdate::status(NodeStatus::Provisioning))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(temp.path()).await.unwrap();
        let snapshot = reopened.load_cluster(&cluster.id).await.unwrap();
        assert_eq!(snapshot.nodes[0].status, NodeStatus::Provisioning);
        assert_eq!(snapshot.edge_devices[&device.id].ip_address, "192.168.1.20");
        assert!(!temp.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_empty_store_has_no_pending_clusters() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).await.unwrap();
        assert!(store
            .clusters_with_status(ClusterStatus::Pending)
            .await
            .unwrap()
            .is_empty());
    }
}
