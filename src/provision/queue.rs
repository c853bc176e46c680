//! Single-worker provisioning queue
//!
//! Clusters are provisioned one at a time, in the order they were enqueued.
//! A cluster that is already queued or running cannot be enqueued again, so
//! two runs for the same cluster never overlap.

use super::{ensure_not_deleting, Orchestrator, ProvisionReport};
use crate::error::{ForgeError, Result};
use crate::model::ClusterStatus;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const QUEUE_DEPTH: usize = 32;

/// Result of one queued run
#[derive(Debug)]
pub struct RunOutcome {
    /// Cluster ID
    pub cluster_id: String,
    /// Report, or the error that aborted the run
    pub result: Result<ProvisionReport>,
}

/// In-process work queue in front of an [`Orchestrator`]
pub struct ProvisionQueue {
    orchestrator: Arc<Orchestrator>,
    tx: mpsc::Sender<String>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    worker: JoinHandle<Vec<RunOutcome>>,
}

impl ProvisionQueue {
    /// Start the worker task
    pub fn start(orchestrator: Arc<Orchestrator>) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_DEPTH);
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let worker_orchestrator = orchestrator.clone();
        let worker_in_flight = in_flight.clone();
        let worker = tokio::spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(cluster_id) = rx.recv().await {
                let result = worker_orchestrator.run(&cluster_id).await;
                match &result {
                    Ok(report) => info!(cluster = %cluster_id, "Provisioning finished: {}", report),
                    Err(e) => error!(cluster = %cluster_id, "Provisioning aborted: {}", e),
                }

                match worker_in_flight.lock() {
                    Ok(mut set) => {
                        set.remove(&cluster_id);
                    }
                    Err(_) => warn!("In-flight set lock poisoned"),
                }
                outcomes.push(RunOutcome { cluster_id, result });
            }
            outcomes
        });

        Self {
            orchestrator,
            tx,
            in_flight,
            worker,
        }
    }

    /// Queue a cluster for provisioning
    ///
    /// Fails with [`ForgeError::AlreadyQueued`] while the cluster is queued
    /// or running, and with [`ForgeError::InvalidState`] once it is being
    /// deleted.
    pub async fn enqueue(&self, cluster_id: &str) -> Result<()> {
        // A missing cluster is reported by the run itself
        if let Ok(snapshot) = self.orchestrator.store().load_cluster(cluster_id).await {
            ensure_not_deleting(&snapshot.cluster)?;
        }

        {
            let mut set = self
                .in_flight
                .lock()
                .map_err(|_| ForgeError::Lock("Failed to acquire queue lock".to_string()))?;
            if !set.insert(cluster_id.to_string()) {
                return Err(ForgeError::AlreadyQueued(cluster_id.to_string()));
            }
        }

        if self.tx.send(cluster_id.to_string()).await.is_err() {
            if let Ok(mut set) = self.in_flight.lock() {
                set.remove(cluster_id);
            }
            return Err(ForgeError::Internal("provisioning worker stopped".to_string()));
        }

        info!(cluster = %cluster_id, "Queued for provisioning");
        Ok(())
    }

    /// Check if a cluster is queued or running
    pub fn is_queued(&self, cluster_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(cluster_id))
            .unwrap_or(false)
    }

    /// Queue every cluster still PENDING in the store
    ///
    /// Returns how many were queued; clusters already in flight are skipped.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self
            .orchestrator
            .store()
            .clusters_with_status(ClusterStatus::Pending)
            .await?;

        let mut queued = 0;
        for cluster in pending {
            match self.enqueue(&cluster.id).await {
                Ok(()) => queued += 1,
                Err(ForgeError::AlreadyQueued(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if queued > 0 {
            info!("Resuming {} pending cluster(s)", queued);
        }
        Ok(queued)
    }

    /// Stop accepting work, wait for queued runs, and return their outcomes
    pub async fn drain(self) -> Result<Vec<RunOutcome>> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| ForgeError::Internal(format!("provisioning worker failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cluster, ClusterSoftware, EdgeDevice, Node};
    use crate::provider::ProviderSet;
    use crate::provision::PipelineSettings;
    use crate::remote::{MockRemoteExecutor, RetryPolicy};
    use crate::store::{ClusterUpdate, MemoryStore, StateStore};
    use std::time::Duration;

    fn orchestrator(store: &MemoryStore) -> Arc<Orchestrator> {
        let executor = MockRemoteExecutor::new();
        let settings = PipelineSettings {
            settle_delay: Duration::ZERO,
            retry: RetryPolicy::fixed(1, Duration::ZERO),
            ..Default::default()
        };
        Arc::new(
            Orchestrator::new(Arc::new(store.clone()), ProviderSet::new(), Arc::new(executor))
                .with_settings(settings),
        )
    }

    fn edge_cluster(store: &MemoryStore) -> String {
        let device = EdgeDevice::new("u1", "pi", "192.168.1.30", "pi");
        let cluster = Cluster::new("u1", "edge-only", ClusterSoftware::Swarm);
        let node = Node::edge(&cluster.id, "pi", &device.id);
        let id = cluster.id.clone();
        store.insert_edge_device(device).unwrap();
        store.insert_cluster(cluster, vec![node]).unwrap();
        id
    }

    #[tokio::test]
    async fn test_duplicate_trigger_is_rejected() {
        let store = MemoryStore::new();
        let id = edge_cluster(&store);
        let queue = ProvisionQueue::start(orchestrator(&store));

        // Single-threaded runtime: the worker cannot start before we yield.
        queue.enqueue(&id).await.unwrap();
        assert!(queue.is_queued(&id));
        let second = queue.enqueue(&id).await;
        assert!(matches!(second, Err(ForgeError::AlreadyQueued(_))));

        let outcomes = queue.drain().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
    }

    #[tokio::test]
    async fn test_recover_pending_clusters() {
        let store = MemoryStore::new();
        let first = edge_cluster(&store);
        let second = edge_cluster(&store);
        let queue = ProvisionQueue::start(orchestrator(&store));

        assert_eq!(queue.recover_pending().await.unwrap(), 2);
        let outcomes = queue.drain().await.unwrap();
        assert_eq!(outcomes.len(), 2);

        for id in [first, second] {
            let snapshot = store.load_cluster(&id).await.unwrap();
            assert_eq!(snapshot.cluster.status, ClusterStatus::Active);
        }
    }

    #[tokio::test]
    async fn test_deleting_cluster_is_not_queued() {
        let store = MemoryStore::new();
        let id = edge_cluster(&store);
        store
            .update_cluster(&id, ClusterUpdate::status(ClusterStatus::Deleting))
            .await
            .unwrap();
        let queue = ProvisionQueue::start(orchestrator(&store));

        let err = queue.enqueue(&id).await.unwrap_err();
        assert!(matches!(err, ForgeError::InvalidState(_)));
        assert!(!queue.is_queued(&id));
        assert!(queue.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_outcome() {
        let store = MemoryStore::new();
        let queue = ProvisionQueue::start(orchestrator(&store));

        queue.enqueue("no-such-cluster").await.unwrap();
        let outcomes = queue.drain().await.unwrap();
        assert!(matches!(
            outcomes[0].result,
            Err(ForgeError::ClusterNotFound(_))
        ));
    }
}
