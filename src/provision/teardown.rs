//! Cluster teardown

use crate::error::Result;
use crate::model::ClusterStatus;
use crate::provider::ProviderSet;
use crate::store::{ClusterUpdate, StateStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Cluster ID
    pub cluster_id: String,
    /// Machines released
    pub released: usize,
    /// Node name and reason for every release that failed
    pub failures: Vec<(String, String)>,
}

/// Releases a cluster's machines
pub struct Decommissioner {
    store: Arc<dyn StateStore>,
    providers: ProviderSet,
}

impl Decommissioner {
    /// Create a decommissioner
    pub fn new(store: Arc<dyn StateStore>, providers: ProviderSet) -> Self {
        Self { store, providers }
    }

    /// Mark the cluster DELETING and request deletion of every machine
    ///
    /// Each deletion is attempted once; failures are reported, not retried.
    /// Edge devices are released without any provider call.
    pub async fn decommission(&self, cluster_id: &str) -> Result<TeardownReport> {
        let snapshot = self.store.load_cluster(cluster_id).await?;
        self.store
            .update_cluster(cluster_id, ClusterUpdate::status(ClusterStatus::Deleting))
            .await?;
        info!(cluster = %cluster_id, "Deleting cluster {}", snapshot.cluster.name);

        let mut report = TeardownReport {
            cluster_id: cluster_id.to_string(),
            ..Default::default()
        };

        for node in &snapshot.nodes {
            let Some(machine_id) = node.machine_id.as_deref() else {
                continue;
            };

            let released = match self.providers.backend(node, &snapshot) {
                Ok(backend) => backend.release(machine_id).await,
                Err(e) => Err(e),
            };

            match released {
                Ok(()) => {
                    info!(node = %node.name, "Released {} ({})", node.name, machine_id);
                    report.released += 1;
                }
                Err(e) => {
                    warn!(node = %node.name, "Failed to release {}: {}", node.name, e);
                    report.failures.push((node.name.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::model::{CloudCredential, Cluster, ClusterSoftware, EdgeDevice, Node, Provider};
    use crate::provider::{Address, CloudProvider, InstanceSpec};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Cloud whose delete call fails for one instance
    struct StubbornCloud {
        refuse: String,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudProvider for StubbornCloud {
        fn kind(&self) -> Provider {
            Provider::Aws
        }

        fn login_user(&self) -> &str {
            "ubuntu"
        }

        async fn create_instance(
            &self,
            _credential: &CloudCredential,
            _spec: &InstanceSpec,
            _public_key: &str,
        ) -> Result<String> {
            unreachable!("teardown never launches")
        }

        async fn public_address(
            &self,
            _credential: &CloudCredential,
            _instance_id: &str,
        ) -> Result<Option<Address>> {
            unreachable!("teardown never describes")
        }

        async fn delete_instance(&self, _credential: &CloudCredential, instance_id: &str) -> Result<()> {
            self.deletes.lock().unwrap().push(instance_id.to_string());
            if instance_id == self.refuse {
                return Err(ForgeError::Provider("UnauthorizedOperation".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported_once_and_others_continue() {
        let store = MemoryStore::new();
        let credential = CloudCredential::new("u1", Provider::Aws, "eu-west-3", "AKIDEXAMPLE")
            .secret_key("secret");
        store.insert_credential(credential.clone()).unwrap();
        let device = EdgeDevice::new("u1", "pi-rack", "192.168.1.40", "pi");
        store.insert_edge_device(device.clone()).unwrap();

        let cluster = Cluster::new("u1", "old", ClusterSoftware::Swarm);
        let id = cluster.id.clone();
        let mut nodes = Vec::new();
        for (i, name) in ["old-cloud-0", "old-cloud-1", "old-cloud-2"].iter().enumerate() {
            let mut node = Node::cloud(&id, name, Provider::Aws, "t2.micro", &credential.id, i == 0);
            node.machine_id = Some(format!("i-{}", name));
            nodes.push(node);
        }
        // Never launched, nothing to release
        nodes.push(Node::cloud(&id, "old-cloud-3", Provider::Aws, "t2.micro", &credential.id, false));
        let mut edge = Node::edge(&id, "pi-rack", &device.id);
        edge.machine_id = Some(format!("edge-{}", device.id));
        nodes.push(edge);
        store.insert_cluster(cluster, nodes).unwrap();

        let cloud = Arc::new(StubbornCloud {
            refuse: "i-old-cloud-0".to_string(),
            deletes: Mutex::new(Vec::new()),
        });
        let decommissioner =
            Decommissioner::new(Arc::new(store.clone()), ProviderSet::new().with(cloud.clone()));
        let report = decommissioner.decommission(&id).await.unwrap();

        assert_eq!(report.cluster_id, id);
        assert_eq!(report.released, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "old-cloud-0");
        assert!(report.failures[0].1.contains("UnauthorizedOperation"));

        assert_eq!(
            *cloud.deletes.lock().unwrap(),
            vec!["i-old-cloud-0", "i-old-cloud-1", "i-old-cloud-2"]
        );

        let snapshot = store.load_cluster(&id).await.unwrap();
        assert_eq!(snapshot.cluster.status, ClusterStatus::Deleting);
    }

    #[tokio::test]
    async fn test_missing_cluster_is_an_error() {
        let decommissioner = Decommissioner::new(Arc::new(MemoryStore::new()), ProviderSet::new());
        let err = decommissioner.decommission("nope").await.unwrap_err();
        assert!(matches!(err, ForgeError::ClusterNotFound(_)));
    }
}
