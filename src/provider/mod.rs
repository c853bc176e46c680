//! Node backends
//!
//! Cloud VMs are created through a [`CloudProvider`] (one implementation per
//! provider API); edge devices already exist and are handled by the
//! [`EdgeAdapter`]. [`ProviderSet::backend`] picks the right one for a node
//! once, so the pipeline never branches on provider identity itself.

pub mod aws;
pub mod edge;
pub mod gcp;
pub mod sigv4;

pub use aws::AwsProvider;
pub use edge::EdgeAdapter;
pub use gcp::GcpProvider;

use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::model::{CloudCredential, EdgeDevice, Node, Provider};
use crate::store::ClusterSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Addresses assigned to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Externally reachable address
    pub public: String,
    /// Address inside the provider network
    pub private: Option<String>,
}

/// What to launch
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Node name, used for tagging
    pub name: String,
    /// Provider size (t2.micro, e2-medium, ...)
    pub instance_type: String,
}

impl InstanceSpec {
    /// Spec for a node
    pub fn for_node(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            instance_type: node.instance_type.clone(),
        }
    }
}

/// A cloud API that rents virtual machines
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider this adapter serves
    fn kind(&self) -> Provider;

    /// Account the trusted key is installed for
    fn login_user(&self) -> &str;

    /// Launch one instance with `public_key` trusted by the login account
    ///
    /// Returns as soon as the provider accepted the request.
    async fn create_instance(
        &self,
        credential: &CloudCredential,
        spec: &InstanceSpec,
        public_key: &str,
    ) -> Result<String>;

    /// Current addresses, `None` while no public address is assigned
    async fn public_address(
        &self,
        credential: &CloudCredential,
        instance_id: &str,
    ) -> Result<Option<Address>>;

    /// Request deletion, without retrying
    async fn delete_instance(&self, credential: &CloudCredential, instance_id: &str) -> Result<()>;
}

/// Resolved backend for one node
pub enum NodeBackend<'a> {
    /// Rented VM
    Cloud {
        provider: Arc<dyn CloudProvider>,
        credential: &'a CloudCredential,
    },
    /// Pre-registered device
    Edge {
        adapter: &'a EdgeAdapter,
        device: &'a EdgeDevice,
    },
}

impl NodeBackend<'_> {
    /// Check if this is an edge device
    pub fn is_edge(&self) -> bool {
        matches!(self, NodeBackend::Edge { .. })
    }

    /// Login account for remote sessions
    pub fn login_user(&self) -> &str {
        match self {
            NodeBackend::Cloud { provider, .. } => provider.login_user(),
            NodeBackend::Edge { device, .. } => &device.ssh_user,
        }
    }

    /// Create the machine and return its identifier
    pub async fn launch(&self, node: &Node, public_key: &str) -> Result<String> {
        match self {
            NodeBackend::Cloud {
                provider,
                credential,
            } => {
                provider
                    .create_instance(credential, &InstanceSpec::for_node(node), public_key)
                    .await
            }
            NodeBackend::Edge { adapter, device } => Ok(adapter.machine_id(device)),
        }
    }

    /// Query addresses for a launched machine
    pub async fn address(&self, machine_id: &str) -> Result<Option<Address>> {
        match self {
            NodeBackend::Cloud {
                provider,
                credential,
            } => provider.public_address(credential, machine_id).await,
            NodeBackend::Edge { adapter, device } => Ok(Some(adapter.address(device))),
        }
    }

    /// Release the machine
    pub async fn release(&self, machine_id: &str) -> Result<()> {
        match self {
            NodeBackend::Cloud {
                provider,
                credential,
            } => provider.delete_instance(credential, machine_id).await,
            NodeBackend::Edge { .. } => Ok(()),
        }
    }
}

/// Registered cloud adapters plus the edge adapter
#[derive(Clone, Default)]
pub struct ProviderSet {
    clouds: HashMap<Provider, Arc<dyn CloudProvider>>,
    edge: EdgeAdapter,
}

impl ProviderSet {
    /// Empty set; only edge nodes resolve
    pub fn new() -> Self {
        Self::default()
    }

    /// AWS and GCP adapters built from configuration
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        Ok(Self::new()
            .with(Arc::new(AwsProvider::new(config.aws.clone())?))
            .with(Arc::new(GcpProvider::new(config.gcp.clone())?)))
    }

    /// Register an adapter, replacing any previous one for its provider
    pub fn with(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.clouds.insert(provider.kind(), provider);
        self
    }

    /// Pick the backend for `node`
    ///
    /// Fails without contacting any provider when the node's credential or
    /// device reference is missing or dangling.
    pub fn backend<'a>(
        &'a self,
        node: &Node,
        snapshot: &'a ClusterSnapshot,
    ) -> Result<NodeBackend<'a>> {
        match node.provider {
            Provider::Edge => {
                let device_id = node.edge_device_id.as_deref().ok_or_else(|| {
                    ForgeError::Config(format!("EDGE node {} has no edge device", node.name))
                })?;
                let device = snapshot
                    .edge_devices
                    .get(device_id)
                    .ok_or_else(|| ForgeError::EdgeDeviceNotFound(device_id.to_string()))?;
                Ok(NodeBackend::Edge {
                    adapter: &self.edge,
                    device,
                })
            }
            kind => {
                let credential_id = node.credential_id.as_deref().ok_or_else(|| {
                    ForgeError::Config(format!("{} node {} missing credentials", kind, node.name))
                })?;
                let credential = snapshot
                    .credentials
                    .get(credential_id)
                    .ok_or_else(|| ForgeError::CredentialNotFound(credential_id.to_string()))?;
                if credential.provider != kind {
                    return Err(ForgeError::Config(format!(
                        "{} node {} references a {} credential",
                        kind, node.name, credential.provider
                    )));
                }
                let provider = self.clouds.get(&kind).cloned().ok_or_else(|| {
                    ForgeError::Config(format!("no adapter registered for {}", kind))
                })?;
                Ok(NodeBackend::Cloud {
                    provider,
                    credential,
                })
            }
        }
    }
}
