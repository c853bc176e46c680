//! Cloud credentials and edge devices

use super::node::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider credential owned by a user
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudCredential {
    /// Credential ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Provider this credential is valid for
    pub provider: Provider,
    /// Default region (e.g. eu-west-3, europe-west1)
    pub region: String,
    /// AWS access key ID, or GCP service-account JSON / access token
    pub access_key: String,
    /// AWS secret access key
    #[serde(default)]
    pub secret_key: Option<String>,
    /// GCP project
    #[serde(default)]
    pub project_id: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl CloudCredential {
    /// Create a new credential
    pub fn new(user_id: &str, provider: Provider, region: &str, access_key: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider,
            region: region.to_string(),
            access_key: access_key.to_string(),
            secret_key: None,
            project_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the secret key
    pub fn secret_key(mut self, secret: &str) -> Self {
        self.secret_key = Some(secret.to_string());
        self
    }

    /// Set the project
    pub fn project_id(mut self, project: &str) -> Self {
        self.project_id = Some(project.to_string());
        self
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for CloudCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Physical host registered out of band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDevice {
    /// Device ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Device name
    pub name: String,
    /// Reachable address
    pub ip_address: String,
    /// Login account
    pub ssh_user: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl EdgeDevice {
    /// Register a new device
    pub fn new(user_id: &str, name: &str, ip_address: &str, ssh_user: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            ip_address: ip_address.to_string(),
            ssh_user: ssh_user.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secrets() {
        let cred = CloudCredential::new("u1", Provider::Aws, "eu-west-3", "AKIAEXAMPLE")
            .secret_key("super-secret");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("eu-west-3"));
    }
}
