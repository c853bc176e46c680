//! Clusterforge - assemble compute clusters from cloud VMs and edge devices
//!
//! Clusterforge turns a declarative cluster request into running machines
//! with cluster software installed:
//!
//! - Per-cluster Ed25519 keypair generation
//! - AWS EC2 and GCP Compute Engine instance management
//! - Pre-registered edge devices as first-class nodes
//! - Remote bootstrap over SSH with bounded readiness polling
//! - A resumable three-stage pipeline behind a single-worker queue

pub mod catalog;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod provider;
pub mod provision;
pub mod remote;
pub mod store;

pub use error::{ForgeError, Result};
