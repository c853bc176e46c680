//! Install command catalogue
//!
//! Maps a cluster's software and a node's role to the ordered shell commands
//! run on that node during bootstrap. The orchestrator only asks the
//! catalogue for a plan, so new software can be added here (or through
//! configuration) without touching the pipeline.

use crate::config::CatalogOverride;
use crate::error::{ForgeError, Result};
use crate::model::{ClusterSoftware, NodeRole};
use std::collections::HashMap;

/// Docker engine installation
pub const DOCKER_INSTALL: &[&str] = &[
    "curl -fsSL https://get.docker.com -o get-docker.sh",
    "sudo sh get-docker.sh",
    "sudo usermod -aG docker $USER",
];

/// K3S server installation; the last command prints the join token
pub const K3S_SERVER_INSTALL: &[&str] = &[
    "curl -sfL https://get.k3s.io | sh -",
    "sudo cat /var/lib/rancher/k3s/server/node-token",
];

/// Commands for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    /// Commands in execution order
    pub commands: Vec<String>,
    /// The last command's output is the cluster join token
    pub captures_join_token: bool,
}

impl InstallPlan {
    /// Build a plan from static command text
    pub fn from_static(commands: &[&str]) -> Self {
        Self {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            captures_join_token: false,
        }
    }

    /// Treat the last command's output as the join token
    pub fn capturing_join_token(mut self) -> Self {
        self.captures_join_token = true;
        self
    }

    /// Check if there is nothing to run
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Source of install plans
pub trait InstallCatalog: Send + Sync {
    /// Plan for a node of `role` in a cluster running `software`
    fn plan(&self, software: ClusterSoftware, role: NodeRole) -> InstallPlan;
}

/// Catalogue backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    plans: HashMap<(ClusterSoftware, NodeRole), InstallPlan>,
}

impl StaticCatalog {
    /// Catalogue with the built-in plans
    ///
    /// SWARM installs the Docker engine on every node. K3S installs the
    /// server on the master and captures its join token; workers get no
    /// commands because joining them is not implemented yet.
    pub fn builtin() -> Self {
        Self::default()
            .with_plan(
                ClusterSoftware::Swarm,
                NodeRole::Master,
                InstallPlan::from_static(DOCKER_INSTALL),
            )
            .with_plan(
                ClusterSoftware::Swarm,
                NodeRole::Worker,
                InstallPlan::from_static(DOCKER_INSTALL),
            )
            .with_plan(
                ClusterSoftware::K3s,
                NodeRole::Master,
                InstallPlan::from_static(K3S_SERVER_INSTALL).capturing_join_token(),
            )
            .with_plan(ClusterSoftware::K3s, NodeRole::Worker, InstallPlan::default())
    }

    /// Register or replace a plan
    pub fn with_plan(mut self, software: ClusterSoftware, role: NodeRole, plan: InstallPlan) -> Self {
        self.plans.insert((software, role), plan);
        self
    }

    /// Apply configured overrides on top of the current table
    pub fn with_overrides(mut self, overrides: &HashMap<String, CatalogOverride>) -> Result<Self> {
        for (name, entry) in overrides {
            let software: ClusterSoftware = name.parse().map_err(ForgeError::InvalidConfig)?;
            let captures = self
                .plans
                .get(&(software, NodeRole::Master))
                .map(|p| p.captures_join_token)
                .unwrap_or(false);

            self.plans.insert(
                (software, NodeRole::Master),
                InstallPlan {
                    commands: entry.master.clone(),
                    captures_join_token: captures && !entry.master.is_empty(),
                },
            );
            self.plans.insert(
                (software, NodeRole::Worker),
                InstallPlan {
                    commands: entry.worker.clone(),
                    captures_join_token: false,
                },
            );
        }
        Ok(self)
    }
}

impl InstallCatalog for StaticCatalog {
    fn plan(&self, software: ClusterSoftware, role: NodeRole) -> InstallPlan {
        self.plans
            .get(&(software, role))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swarm_ignores_role() {
        let catalog = StaticCatalog::builtin();
        let master = catalog.plan(ClusterSoftware::Swarm, NodeRole::Master);
        let worker = catalog.plan(ClusterSoftware::Swarm, NodeRole::Worker);

        assert_eq!(master, worker);
        assert_eq!(master.commands.len(), 3);
        assert!(master.commands[0].contains("get.docker.com"));
    }

    #[test]
    fn test_k3s_master_captures_token() {
        let catalog = StaticCatalog::builtin();
        let master = catalog.plan(ClusterSoftware::K3s, NodeRole::Master);

        assert!(master.captures_join_token);
        assert!(master.commands.last().unwrap().contains("node-token"));
        assert!(catalog.plan(ClusterSoftware::K3s, NodeRole::Worker).is_empty());
    }

    #[test]
    fn test_undefined_software_has_no_commands() {
        let catalog = StaticCatalog::builtin();
        assert!(catalog.plan(ClusterSoftware::Nomad, NodeRole::Master).is_empty());
        assert!(catalog.plan(ClusterSoftware::Kubernetes, NodeRole::Worker).is_empty());
    }

    #[test]
    fn test_overrides_replace_plans() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "nomad".to_string(),
            CatalogOverride {
                master: vec!["install-nomad --server".to_string()],
                worker: vec!["install-nomad --client".to_string()],
            },
        );

        let catalog = StaticCatalog::builtin().with_overrides(&overrides).unwrap();
        let worker = catalog.plan(ClusterSoftware::Nomad, NodeRole::Worker);
        assert_eq!(worker.commands, vec!["install-nomad --client".to_string()]);
        assert!(!catalog.plan(ClusterSoftware::Nomad, NodeRole::Master).captures_join_token);
    }
}
