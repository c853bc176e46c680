//! Cluster provisioning pipeline
//!
//! [`Orchestrator::run`] carries one cluster through three cluster-wide
//! stages: launch every node, discover addresses, then bootstrap software
//! over SSH. A stage is attempted for every node before the next one starts,
//! and nodes inside a stage are handled one at a time. A node that fails is
//! marked FAILED and the loop moves on; only a missing or deleting cluster,
//! a key generation failure or a state store error aborts the run.
//!
//! The last completed stage is persisted on the cluster, so a run that was
//! interrupted resumes after it with the same key.

pub mod context;
pub mod queue;
mod stages;
pub mod teardown;

pub use context::{ProvisionReport, RunContext};
pub use queue::{ProvisionQueue, RunOutcome};
pub use teardown::{Decommissioner, TeardownReport};

use crate::catalog::{InstallCatalog, StaticCatalog};
use crate::config::{CommandFailurePolicy, ForgeConfig};
use crate::error::{ForgeError, Result};
use crate::keys::{Ed25519KeyGenerator, KeyGenerator};
use crate::model::{Cluster, ClusterStatus, Node, NodeStatus, ProvisionStage};
use crate::provider::ProviderSet;
use crate::remote::{RemoteExecutor, RetryPolicy};
use crate::store::{ClusterSnapshot, ClusterUpdate, NodeUpdate, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Timing and failure handling for a run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Wait before address discovery
    pub settle_delay: Duration,
    /// SSH readiness polling
    pub retry: RetryPolicy,
    /// Handling of non-zero install command exits
    pub command_failure: CommandFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ForgeConfig::default())
    }
}

impl From<&ForgeConfig> for PipelineSettings {
    fn from(config: &ForgeConfig) -> Self {
        Self {
            settle_delay: config.provisioning.settle_delay(),
            retry: RetryPolicy::from(&config.ssh),
            command_failure: config.provisioning.command_failure,
        }
    }
}

/// Drives clusters through the provisioning stages
pub struct Orchestrator {
    /// Cluster and node rows, the only place run state is written
    store: Arc<dyn StateStore>,
    /// Backends for cloud and edge nodes
    providers: ProviderSet,
    /// Remote sessions for readiness checks and installs
    executor: Arc<dyn RemoteExecutor>,
    /// Cluster keypair source
    keys: Arc<dyn KeyGenerator>,
    /// Install commands per software and role
    catalog: Arc<dyn InstallCatalog>,
    /// Timing and failure handling
    settings: PipelineSettings,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in catalogue and Ed25519 keys
    pub fn new(
        store: Arc<dyn StateStore>,
        providers: ProviderSet,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            store,
            providers,
            executor,
            keys: Arc::new(Ed25519KeyGenerator),
            catalog: Arc::new(StaticCatalog::builtin()),
            settings: PipelineSettings::default(),
        }
    }

    /// Orchestrator wired from configuration
    pub fn from_config(
        config: &ForgeConfig,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self> {
        let catalog = StaticCatalog::builtin().with_overrides(&config.catalog)?;
        Ok(Self::new(store, ProviderSet::from_config(config)?, executor)
            .with_catalog(Arc::new(catalog))
            .with_settings(PipelineSettings::from(config)))
    }

    /// Replace the key generator
    pub fn with_keys(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    /// Replace the install catalogue
    pub fn with_catalog(mut self, catalog: Arc<dyn InstallCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the pipeline settings
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The state store runs are recorded in
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Provision one cluster
    ///
    /// Per-node failures are recorded on the nodes and never returned. The
    /// cluster ends ACTIVE however many nodes failed; the report carries
    /// the counts.
    ///
    /// Only PENDING clusters are provisioned. An ACTIVE cluster is reported
    /// as it stands without any provider or remote call, and a DELETING
    /// cluster is refused with [`ForgeError::InvalidState`].
    pub async fn run(&self, cluster_id: &str) -> Result<ProvisionReport> {
        info!(cluster = %cluster_id, "[Provisioning] Starting for cluster {}", cluster_id);

        let snapshot = self.store.load_cluster(cluster_id).await?;
        ensure_not_deleting(&snapshot.cluster)?;
        if snapshot.cluster.status == ClusterStatus::Active {
            info!(cluster = %cluster_id, "[Provisioning] Cluster is already active, nothing to do");
            return Ok(ProvisionReport {
                cluster_id: cluster_id.to_string(),
                active: snapshot.nodes_with_status(NodeStatus::Active).len(),
                failed: snapshot.nodes_with_status(NodeStatus::Failed).len(),
                launched: 0,
                resumed_after: snapshot.cluster.provision_stage,
                join_token: None,
            });
        }

        let mut ctx = self.prepare(&snapshot).await?;
        let cluster = &snapshot.cluster;

        if cluster.stage_done(ProvisionStage::Launch) {
            info!(cluster = %cluster_id, "[Provisioning] Stage 1 already complete, skipping");
        } else {
            info!(cluster = %cluster_id, "[Provisioning] Stage 1: Launching VMs...");
            self.launch_stage(&mut ctx).await?;
            self.complete(&ctx, ProvisionStage::Launch).await?;
        }

        if cluster.stage_done(ProvisionStage::Network) {
            info!(cluster = %cluster_id, "[Provisioning] Stage 2 already complete, skipping");
        } else {
            info!(cluster = %cluster_id, "[Provisioning] Stage 2: Waiting for Network...");
            self.network_stage(&mut ctx).await?;
            self.complete(&ctx, ProvisionStage::Network).await?;
        }

        if cluster.stage_done(ProvisionStage::Bootstrap) {
            info!(cluster = %cluster_id, "[Provisioning] Stage 3 already complete, skipping");
        } else {
            info!(cluster = %cluster_id, "[Provisioning] Stage 3: Bootstrapping...");
            self.bootstrap_stage(&mut ctx).await?;
            self.complete(&ctx, ProvisionStage::Bootstrap).await?;
        }

        self.store
            .update_cluster(cluster_id, ClusterUpdate::status(ClusterStatus::Active))
            .await?;

        let report = self.report(ctx).await?;
        info!(cluster = %cluster_id, "[Provisioning] Cluster is ready: {}", report);
        Ok(report)
    }

    /// Load or create the cluster key
    async fn prepare(&self, snapshot: &ClusterSnapshot) -> Result<RunContext> {
        let cluster = &snapshot.cluster;

        if let (Some(public_key), Some(private_key)) = (&cluster.public_key, &cluster.private_key) {
            debug!(cluster = %cluster.id, "Reusing persisted cluster key");
            return Ok(RunContext::new(
                &cluster.id,
                public_key.clone(),
                private_key.clone(),
                cluster.provision_stage,
            ));
        }

        let pair = self.keys.generate(&format!("clusterforge-{}", cluster.id))?;
        self.store
            .update_cluster(
                &cluster.id,
                ClusterUpdate {
                    private_key: Some(pair.private_key.clone()),
                    public_key: Some(pair.public_key.clone()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(RunContext::new(
            &cluster.id,
            pair.public_key,
            pair.private_key,
            cluster.provision_stage,
        ))
    }

    async fn complete(&self, ctx: &RunContext, stage: ProvisionStage) -> Result<()> {
        debug!(cluster = %ctx.cluster_id, "Stage {} complete", stage);
        self.store
            .update_cluster(&ctx.cluster_id, ClusterUpdate::stage(stage))
            .await
    }

    /// Record a node failure with its class
    async fn fail_node(&self, node: &Node, stage: &str, err: &ForgeError) -> Result<()> {
        error!(
            cluster = %node.cluster_id,
            node = %node.name,
            "[{}] Failed {}: {}", stage, node.name, err
        );
        self.store
            .update_node(&node.id, NodeUpdate::failed(failure_reason(err)))
            .await
    }

    async fn report(&self, ctx: RunContext) -> Result<ProvisionReport> {
        let snapshot = self.store.load_cluster(&ctx.cluster_id).await?;
        Ok(ProvisionReport {
            cluster_id: ctx.cluster_id,
            active: snapshot.nodes_with_status(NodeStatus::Active).len(),
            failed: snapshot.nodes_with_status(NodeStatus::Failed).len(),
            launched: ctx.launched,
            resumed_after: ctx.resumed_after,
            join_token: ctx.join_token,
        })
    }
}

/// Refuse to provision a cluster that is being torn down
pub(crate) fn ensure_not_deleting(cluster: &Cluster) -> Result<()> {
    if cluster.status == ClusterStatus::Deleting {
        return Err(ForgeError::InvalidState(format!(
            "cluster {} is being deleted",
            cluster.id
        )));
    }
    Ok(())
}

/// `kind: message` text stored on a failed node
pub fn failure_reason(err: &ForgeError) -> String {
    format!("{}: {}", err.failure_kind(), err)
}
