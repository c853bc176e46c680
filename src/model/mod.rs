//! Cluster, node and credential records
//!
//! These are the rows the provisioning pipeline reads and mutates. They are
//! plain serde types so any state store can hold them.

pub mod cluster;
pub mod credential;
pub mod node;
pub mod request;

pub use cluster::{Cluster, ClusterSoftware, ClusterStatus, ProvisionStage};
pub use credential::{CloudCredential, EdgeDevice};
pub use node::{Node, NodeRole, NodeStatus, Provider};
pub use request::{CloudNodeRequest, ClusterRequest};
