//! Per-run state threaded through the stages

use crate::model::ProvisionStage;
use std::collections::HashMap;

/// State carried from one stage to the next within a single run
pub struct RunContext {
    /// Cluster being provisioned
    pub cluster_id: String,
    /// Public half of the cluster key, trusted by every node
    pub public_key: String,
    /// Private half, used for every remote session
    pub private_key: String,
    /// Last stage completed before this run started
    pub resumed_after: Option<ProvisionStage>,
    /// Join token printed by the K3S master
    pub join_token: Option<String>,
    /// Why a node got no address in the network stage, by node ID
    pub address_errors: HashMap<String, String>,
    /// Nodes launched in this run
    pub launched: usize,
}

impl RunContext {
    /// Context for a run using the given keypair
    pub fn new(
        cluster_id: &str,
        public_key: String,
        private_key: String,
        resumed_after: Option<ProvisionStage>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            public_key,
            private_key,
            resumed_after,
            join_token: None,
            address_errors: HashMap::new(),
            launched: 0,
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cluster_id", &self.cluster_id)
            .field("resumed_after", &self.resumed_after)
            .field("join_token", &self.join_token.as_ref().map(|_| "<captured>"))
            .field("launched", &self.launched)
            .finish_non_exhaustive()
    }
}

/// Outcome of a finished run
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Cluster ID
    pub cluster_id: String,
    /// Nodes that ended ACTIVE
    pub active: usize,
    /// Nodes that ended FAILED
    pub failed: usize,
    /// Nodes launched by this run
    pub launched: usize,
    /// Last stage completed before this run started
    pub resumed_after: Option<ProvisionStage>,
    /// Join token printed by the K3S master
    pub join_token: Option<String>,
}

impl ProvisionReport {
    /// Total nodes accounted for
    pub fn total(&self) -> usize {
        self.active + self.failed
    }

    /// Check if every node became active
    pub fn all_active(&self) -> bool {
        self.failed == 0
    }
}

impl std::fmt::Debug for ProvisionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionReport")
            .field("cluster_id", &self.cluster_id)
            .field("active", &self.active)
            .field("failed", &self.failed)
            .field("launched", &self.launched)
            .field("resumed_after", &self.resumed_after)
            .field("join_token_captured", &self.join_token.is_some())
            .finish()
    }
}

impl std::fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cluster {}: {}/{} nodes active",
            self.cluster_id,
            self.active,
            self.total()
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.join_token.is_some() {
            write!(f, ", join token captured")?;
        }
        Ok(())
    }
}
