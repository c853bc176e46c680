//! Error types for clusterforge

use thiserror::Error;

/// Result type for clusterforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Clusterforge error types
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider resource not found: {0}")]
    ProviderNotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Edge device not found: {0}")]
    EdgeDeviceNotFound(String),

    #[error("Already provisioning: {0}")]
    AlreadyQueued(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ForgeError {
    fn from(e: reqwest::Error) -> Self {
        ForgeError::Http(e.to_string())
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(e: serde_yaml::Error) -> Self {
        ForgeError::Yaml(e.to_string())
    }
}

/// Class of a provisioning failure, used when a node is marked failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing or malformed credential/device reference
    Configuration,
    /// Provider rejected a request or lost the resource
    Provider,
    /// Remote host never became reachable
    Connectivity,
    /// A remote command exited non-zero
    Command,
    /// Aborts the whole run
    RunFatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration"),
            FailureKind::Provider => write!(f, "provider"),
            FailureKind::Connectivity => write!(f, "connectivity"),
            FailureKind::Command => write!(f, "command"),
            FailureKind::RunFatal => write!(f, "run-fatal"),
        }
    }
}

impl ForgeError {
    /// Classify the error for failure bookkeeping
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ForgeError::Config(_)
            | ForgeError::CredentialNotFound(_)
            | ForgeError::EdgeDeviceNotFound(_)
            | ForgeError::InvalidConfig(_) => FailureKind::Configuration,
            ForgeError::Provider(_) | ForgeError::ProviderNotFound(_) | ForgeError::Http(_) => {
                FailureKind::Provider
            }
            ForgeError::Connection(_) | ForgeError::Timeout(_) => FailureKind::Connectivity,
            ForgeError::Command(_) => FailureKind::Command,
            _ => FailureKind::RunFatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            ForgeError::CredentialNotFound("c1".into()).failure_kind(),
            FailureKind::Configuration
        );
        assert_eq!(
            ForgeError::ProviderNotFound("i-1".into()).failure_kind(),
            FailureKind::Provider
        );
        assert_eq!(
            ForgeError::Timeout("ssh".into()).failure_kind(),
            FailureKind::Connectivity
        );
        assert_eq!(
            ForgeError::KeyGeneration("rng".into()).failure_kind(),
            FailureKind::RunFatal
        );
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Connectivity.to_string(), "connectivity");
    }
}
