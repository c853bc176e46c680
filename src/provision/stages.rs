//! Launch, network and bootstrap stages

use super::{failure_reason, Orchestrator, RunContext};
use crate::config::CommandFailurePolicy;
use crate::error::{ForgeError, Result};
use crate::model::{Node, NodeStatus};
use crate::remote::{wait_for_ready, CommandOutcome, RemoteTarget};
use crate::store::{ClusterSnapshot, NodeUpdate};
use tracing::{debug, error, info, warn};

/// Node still needs a machine
///
/// A node left PROVISIONING without a machine ID was interrupted before its
/// launch was recorded.
fn needs_launch(node: &Node) -> bool {
    match node.status {
        NodeStatus::Pending => true,
        NodeStatus::Provisioning => node.machine_id.is_none(),
        NodeStatus::Active | NodeStatus::Failed => false,
    }
}

impl Orchestrator {
    pub(super) async fn launch_stage(&self, ctx: &mut RunContext) -> Result<()> {
        let snapshot = self.store.load_cluster(&ctx.cluster_id).await?;

        for node in snapshot.nodes.iter().filter(|n| needs_launch(n)) {
            self.store
                .update_node(&node.id, NodeUpdate::status(NodeStatus::Provisioning))
                .await?;

            let launched = match self.providers.backend(node, &snapshot) {
                Ok(backend) => backend.launch(node, &ctx.public_key).await,
                Err(e) => Err(e),
            };

            match launched {
                Ok(machine_id) => {
                    self.store
                        .update_node(&node.id, NodeUpdate::machine_id(machine_id.as_str()))
                        .await?;
                    ctx.launched += 1;
                    info!(
                        cluster = %ctx.cluster_id,
                        node = %node.name,
                        "[Launch] Node {} created with ID {}", node.name, machine_id
                    );
                }
                Err(e) => self.fail_node(node, "Launch", &e).await?,
            }
        }

        Ok(())
    }

    pub(super) async fn network_stage(&self, ctx: &mut RunContext) -> Result<()> {
        let before = self.store.load_cluster(&ctx.cluster_id).await?;
        let waiting_on_cloud = before
            .nodes_with_status(NodeStatus::Provisioning)
            .iter()
            .any(|n| n.provider.is_cloud());

        let settle = self.settings.settle_delay;
        if waiting_on_cloud && !settle.is_zero() {
            debug!(cluster = %ctx.cluster_id, "Waiting {:?} for address assignment", settle);
            tokio::time::sleep(settle).await;
        }

        let snapshot = self.store.load_cluster(&ctx.cluster_id).await?;
        for node in snapshot.nodes_with_status(NodeStatus::Provisioning) {
            let Some(machine_id) = node.machine_id.as_deref() else {
                warn!(node = %node.name, "[Network] Node {} has no machine ID", node.name);
                ctx.address_errors.insert(
                    node.id.clone(),
                    failure_reason(&ForgeError::Provider("no machine ID recorded".to_string())),
                );
                continue;
            };

            let address = match self.providers.backend(&node, &snapshot) {
                Ok(backend) => backend.address(machine_id).await,
                Err(e) => Err(e),
            };

            match address {
                Ok(Some(address)) => {
                    info!(
                        cluster = %ctx.cluster_id,
                        node = %node.name,
                        "[Network] Node {} has IP {}", node.name, address.public
                    );
                    self.store
                        .update_node(&node.id, NodeUpdate::addresses(address.public, address.private))
                        .await?;
                }
                Ok(None) => {
                    info!(node = %node.name, "[Network] Node {} has no public address yet", node.name);
                    ctx.address_errors.insert(
                        node.id.clone(),
                        failure_reason(&ForgeError::Provider(
                            "no public address assigned".to_string(),
                        )),
                    );
                }
                Err(e) => {
                    warn!(
                        cluster = %ctx.cluster_id,
                        node = %node.name,
                        "[Network] Failed to get IP for {}: {}", node.name, e
                    );
                    ctx.address_errors.insert(node.id.clone(), failure_reason(&e));
                }
            }
        }

        Ok(())
    }

    pub(super) async fn bootstrap_stage(&self, ctx: &mut RunContext) -> Result<()> {
        let snapshot = self.store.load_cluster(&ctx.cluster_id).await?;

        for node in snapshot.nodes_with_status(NodeStatus::Provisioning) {
            let Some(ip) = node.public_ip.clone() else {
                let reason = ctx.address_errors.remove(&node.id).unwrap_or_else(|| {
                    failure_reason(&ForgeError::Provider("no public address assigned".to_string()))
                });
                error!(
                    cluster = %ctx.cluster_id,
                    node = %node.name,
                    "[Bootstrap] Node {} has no address: {}", node.name, reason
                );
                self.store.update_node(&node.id, NodeUpdate::failed(reason)).await?;
                continue;
            };

            match self.bootstrap_node(ctx, &snapshot, &node, &ip).await {
                Ok(()) => {
                    self.store
                        .update_node(&node.id, NodeUpdate::status(NodeStatus::Active))
                        .await?;
                    info!(
                        cluster = %ctx.cluster_id,
                        node = %node.name,
                        "[Bootstrap] Finished {}", node.name
                    );
                }
                Err(e) => self.fail_node(&node, "Bootstrap", &e).await?,
            }
        }

        Ok(())
    }

    async fn bootstrap_node(
        &self,
        ctx: &mut RunContext,
        snapshot: &ClusterSnapshot,
        node: &Node,
        ip: &str,
    ) -> Result<()> {
        let backend = self.providers.backend(node, snapshot)?;
        if backend.is_edge() {
            debug!(node = %node.name, "Edge device, no remote verification");
            return Ok(());
        }

        let target = RemoteTarget::new(ip, backend.login_user(), &ctx.private_key);
        info!(node = %node.name, "[Bootstrap] Connecting to {} ({})...", node.name, ip);
        wait_for_ready(self.executor.as_ref(), &target, &self.settings.retry).await?;

        let software = snapshot.cluster.software;
        let plan = self.catalog.plan(software, node.role());
        if plan.is_empty() {
            info!(
                node = %node.name,
                "[Bootstrap] No {} commands for {:?} node {}", software, node.role(), node.name
            );
            return Ok(());
        }

        let outcomes = self.executor.execute(&target, &plan.commands).await?;
        let failed: Vec<&CommandOutcome> = outcomes.iter().filter(|o| !o.success()).collect();
        for outcome in &failed {
            error!(
                node = %node.name,
                "[Bootstrap] '{}' exited {} on {}: {}",
                outcome.command,
                outcome.exit_status,
                node.name,
                outcome.stderr.trim()
            );
        }

        if plan.captures_join_token {
            let token = outcomes
                .last()
                .filter(|o| o.success())
                .map(|o| o.stdout.trim())
                .filter(|t| !t.is_empty());
            match token {
                Some(token) => {
                    info!(node = %node.name, "[Bootstrap] Captured join token from {}", node.name);
                    ctx.join_token = Some(token.to_string());
                }
                None => warn!(node = %node.name, "[Bootstrap] No join token printed by {}", node.name),
            }
        }

        if let Some(first) = failed.first() {
            if self.settings.command_failure == CommandFailurePolicy::FailNode {
                return Err(ForgeError::Command(format!(
                    "{} of {} install commands failed, first: '{}' exited {}",
                    failed.len(),
                    outcomes.len(),
                    first.command,
                    first.exit_status
                )));
            }
        }

        Ok(())
    }
}
