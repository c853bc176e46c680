//! Runtime configuration
//!
//! Loaded from an optional YAML file. Every field has a default so an empty
//! or missing file yields a working configuration.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
    /// Directory holding the state store
    pub state_dir: PathBuf,
    /// Pipeline settings
    pub provisioning: ProvisioningConfig,
    /// Remote execution settings
    pub ssh: SshConfig,
    /// AWS adapter settings
    pub aws: AwsConfig,
    /// GCP adapter settings
    pub gcp: GcpConfig,
    /// Install command overrides, keyed by software name
    pub catalog: HashMap<String, CatalogOverride>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            state_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib"))
                .join("clusterforge"),
            provisioning: ProvisioningConfig::default(),
            ssh: SshConfig::default(),
            aws: AwsConfig::default(),
            gcp: GcpConfig::default(),
            catalog: HashMap::new(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.ssh.max_attempts == 0 {
            return Err(ForgeError::InvalidConfig(
                "ssh.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ssh.backoff_multiplier < 1.0 {
            return Err(ForgeError::InvalidConfig(
                "ssh.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.ssh.max_interval_ms < self.ssh.interval_ms {
            return Err(ForgeError::InvalidConfig(
                "ssh.max_interval_ms must be >= ssh.interval_ms".to_string(),
            ));
        }
        for software in self.catalog.keys() {
            software
                .parse::<crate::model::ClusterSoftware>()
                .map_err(ForgeError::InvalidConfig)?;
        }
        Ok(())
    }
}

/// What to do when an install command exits non-zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandFailurePolicy {
    /// Log the failure and keep the node's outcome unchanged
    #[default]
    Log,
    /// Mark the node failed
    FailNode,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Wait between launch and address discovery
    pub settle_delay_secs: u64,
    /// Handling of non-zero install command exits
    pub command_failure: CommandFailurePolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 15,
            command_failure: CommandFailurePolicy::Log,
        }
    }
}

impl ProvisioningConfig {
    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Remote execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Readiness attempts before giving up on a node
    pub max_attempts: u32,
    /// First wait between readiness attempts
    pub interval_ms: u64,
    /// Growth factor of the wait; 1.0 keeps it fixed
    pub backoff_multiplier: f64,
    /// Upper bound for the wait
    pub max_interval_ms: u64,
    /// TCP connect timeout
    pub connect_timeout_secs: u64,
    /// Timeout for a single remote command
    pub command_timeout_secs: u64,
    /// ssh client binary
    pub binary: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval_ms: 6000,
            backoff_multiplier: 1.0,
            max_interval_ms: 60_000,
            connect_timeout_secs: 10,
            command_timeout_secs: 900,
            binary: "ssh".to_string(),
        }
    }
}

/// AWS adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Override of `https://ec2.{region}.amazonaws.com`
    pub endpoint: Option<String>,
    /// AMI used when the region has no entry
    pub default_ami: String,
    /// Ubuntu AMI per region
    pub ami_by_region: HashMap<String, String>,
    /// Account the public key is installed for
    pub login_user: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        let mut ami_by_region = HashMap::new();
        ami_by_region.insert("eu-west-3".to_string(), "ami-00ac45f306d58a38d".to_string());
        ami_by_region.insert("us-east-1".to_string(), "ami-0c7217cdde317cfec".to_string());
        Self {
            endpoint: None,
            default_ami: "ami-00ac45f306d58a38d".to_string(),
            ami_by_region,
            login_user: "ubuntu".to_string(),
        }
    }
}

/// GCP adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    /// Compute Engine API root
    pub compute_endpoint: String,
    /// OAuth2 token endpoint
    pub token_endpoint: String,
    /// Boot image
    pub image: String,
    /// Appended to the credential region to form the zone
    pub zone_suffix: String,
    /// Account the public key is installed for
    pub login_user: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            compute_endpoint: "https://compute.googleapis.com/compute/v1".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            image: "projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts".to_string(),
            zone_suffix: "-b".to_string(),
            login_user: "ubuntu".to_string(),
        }
    }
}

/// Replacement command lists for one software
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogOverride {
    /// Commands for the master node
    pub master: Vec<String>,
    /// Commands for every other node
    pub worker: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.provisioning.settle_delay(), Duration::from_secs(15));
        assert_eq!(config.ssh.max_attempts, 20);
        assert_eq!(config.ssh.interval_ms, 6000);
        assert_eq!(config.provisioning.command_failure, CommandFailurePolicy::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
provisioning:
  settle_delay_secs: 2
  command_failure: fail-node
ssh:
  max_attempts: 3
"#;
        let config = ForgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.provisioning.settle_delay_secs, 2);
        assert_eq!(config.provisioning.command_failure, CommandFailurePolicy::FailNode);
        assert_eq!(config.ssh.max_attempts, 3);
        assert_eq!(config.ssh.interval_ms, 6000);
        assert_eq!(config.gcp.zone_suffix, "-b");
    }

    #[test]
    fn test_empty_yaml() {
        let config = ForgeConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = ForgeConfig::default();
        config.ssh.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ForgeError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_catalog_software() {
        let mut config = ForgeConfig::default();
        config
            .catalog
            .insert("mesos".to_string(), CatalogOverride::default());
        assert!(config.validate().is_err());
    }
}
