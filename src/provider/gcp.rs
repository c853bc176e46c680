//! Google Compute Engine adapter
//!
//! The credential's access key is either a service-account JSON document,
//! exchanged for an OAuth2 token with a signed JWT, or a ready-made access
//! token. Tokens are cached per credential until shortly before expiry.

use super::{Address, CloudProvider, InstanceSpec};
use crate::config::GcpConfig;
use crate::error::{ForgeError, Result};
use crate::model::{CloudCredential, Provider};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Service-account key file, fields we need
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// How a credential authenticates
enum TokenSource {
    ServiceAccount(ServiceAccountKey),
    Static(String),
}

impl TokenSource {
    fn parse(access_key: &str) -> Result<Self> {
        let trimmed = access_key.trim();
        if trimmed.starts_with('{') {
            let key: ServiceAccountKey = serde_json::from_str(trimmed).map_err(|e| {
                ForgeError::Config(format!("invalid service-account JSON: {}", e))
            })?;
            Ok(TokenSource::ServiceAccount(key))
        } else if trimmed.is_empty() {
            Err(ForgeError::Config("GCP credential has no key material".to_string()))
        } else {
            Ok(TokenSource::Static(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default, rename = "networkIP")]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(default, rename = "natIP")]
    nat_ip: Option<String>,
}

/// Compute Engine adapter
pub struct GcpProvider {
    config: GcpConfig,
    client: reqwest::Client,
    tokens: Mutex<HashMap<String, (String, Instant)>>,
}

impl GcpProvider {
    /// Create a new adapter
    pub fn new(config: GcpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ForgeError::Http(e.to_string()))?;
        Ok(Self {
            config,
            client,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Zone for a credential region
    pub fn zone(&self, region: &str) -> String {
        format!("{}{}", region, self.config.zone_suffix)
    }

    /// Unique, API-valid instance name for a node
    pub fn instance_name(node_name: &str) -> String {
        let mut base: String = node_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        if !base.starts_with(|c: char| c.is_ascii_lowercase()) {
            base.insert_str(0, "n-");
        }
        base.truncate(56);
        let suffix: u32 = rand::thread_rng().gen_range(0..10000);
        format!("{}-{}", base.trim_end_matches('-'), suffix)
    }

    fn project(&self, credential: &CloudCredential, source: &TokenSource) -> Result<String> {
        if let Some(project) = credential.project_id.as_deref().filter(|p| !p.is_empty()) {
            return Ok(project.to_string());
        }
        if let TokenSource::ServiceAccount(key) = source {
            if let Some(project) = key.project_id.as_deref() {
                return Ok(project.to_string());
            }
        }
        Err(ForgeError::Config(format!(
            "GCP credential {} has no project",
            credential.id
        )))
    }

    async fn access_token(&self, credential: &CloudCredential, source: &TokenSource) -> Result<String> {
        let key = match source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(key) => key,
        };

        let mut tokens = self.tokens.lock().await;
        if let Some((token, expires)) = tokens.get(&credential.id) {
            if Instant::now() + EXPIRY_MARGIN < *expires {
                return Ok(token.clone());
            }
        }

        // The assertion is addressed to the endpoint it is posted to
        let audience = self.config.token_endpoint.as_str();
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &key.client_email,
            scope: COMPUTE_SCOPE,
            aud: audience,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ForgeError::Config(format!("invalid service-account key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| ForgeError::Config(format!("cannot sign token request: {}", e)))?;

        debug!("[GCP] Requesting token for {}", key.client_email);
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&[("grant_type", JWT_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::Provider(format!(
                "token exchange failed: {} {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        tokens.insert(
            credential.id.clone(),
            (token.access_token.clone(), Instant::now() + lifetime),
        );
        Ok(token.access_token)
    }

    /// Authenticated request context for a credential
    async fn session(&self, credential: &CloudCredential) -> Result<(String, String)> {
        let source = TokenSource::parse(&credential.access_key)?;
        let project = self.project(credential, &source)?;
        let token = self.access_token(credential, &source).await?;
        let base = format!(
            "{}/projects/{}/zones/{}/instances",
            self.config.compute_endpoint.trim_end_matches('/'),
            project,
            self.zone(&credential.region)
        );
        Ok((base, token))
    }

    fn instance_body(&self, name: &str, zone: &str, spec: &InstanceSpec, public_key: &str) -> serde_json::Value {
        json!({
            "name": name,
            "machineType": format!("zones/{}/machineTypes/{}", zone, spec.instance_type),
            "labels": { "clusterforge-node": label_value(&spec.name) },
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": { "sourceImage": self.config.image },
            }],
            "networkInterfaces": [{
                "network": "global/networks/default",
                "accessConfigs": [{ "name": "External NAT", "type": "ONE_TO_ONE_NAT" }],
            }],
            "metadata": {
                "items": [{
                    "key": "ssh-keys",
                    "value": format!("{}:{}", self.config.login_user, public_key.trim()),
                }],
            },
        })
    }
}

fn label_value(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(63)
        .collect()
}

async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        Err(ForgeError::ProviderNotFound(format!("{}: {}", what, body)))
    } else {
        Err(ForgeError::Provider(format!("{} failed: {} {}", what, status, body)))
    }
}

#[async_trait]
impl CloudProvider for GcpProvider {
    fn kind(&self) -> Provider {
        Provider::Gcp
    }

    fn login_user(&self) -> &str {
        &self.config.login_user
    }

    async fn create_instance(
        &self,
        credential: &CloudCredential,
        spec: &InstanceSpec,
        public_key: &str,
    ) -> Result<String> {
        let (base, token) = self.session(credential).await?;
        let zone = self.zone(&credential.region);
        let name = Self::instance_name(&spec.name);

        let response = self
            .client
            .post(&base)
            .bearer_auth(token)
            .json(&self.instance_body(&name, &zone, spec, public_key))
            .send()
            .await?;
        check(response, "instances.insert").await?;

        info!("[GCP] Creating {} in {}", name, zone);
        Ok(name)
    }

    async fn public_address(
        &self,
        credential: &CloudCredential,
        instance_id: &str,
    ) -> Result<Option<Address>> {
        let (base, token) = self.session(credential).await?;
        let response = self
            .client
            .get(format!("{}/{}", base, instance_id))
            .bearer_auth(token)
            .send()
            .await?;
        let instance: InstanceResource = check(response, "instances.get").await?.json().await?;

        let Some(interface) = instance.network_interfaces.into_iter().next() else {
            return Ok(None);
        };
        let public = interface
            .access_configs
            .into_iter()
            .next()
            .and_then(|a| a.nat_ip);

        Ok(public.map(|public| Address {
            public,
            private: interface.network_ip,
        }))
    }

    async fn delete_instance(&self, credential: &CloudCredential, instance_id: &str) -> Result<()> {
        let (base, token) = self.session(credential).await?;
        info!("[GCP] Deleting instance {}...", instance_id);
        let response = self
            .client
            .delete(format!("{}/{}", base, instance_id))
            .bearer_auth(token)
            .send()
            .await?;
        check(response, "instances.delete").await?;
        Ok(())
    }
}
