//! Amazon EC2 adapter
//!
//! Talks to the EC2 Query API directly: form-encoded POST requests signed
//! with SigV4, XML responses. The trusted key is installed through a
//! user-data script run by cloud-init on first boot.

use super::sigv4::{canonical_query, SignableRequest, Signer};
use super::{Address, CloudProvider, InstanceSpec};
use crate::config::AwsConfig;
use crate::error::{ForgeError, Result};
use crate::model::{CloudCredential, Provider};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

const API_VERSION: &str = "2016-11-15";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// EC2 adapter
pub struct AwsProvider {
    config: AwsConfig,
    client: reqwest::Client,
}

impl AwsProvider {
    /// Create a new adapter
    pub fn new(config: AwsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ForgeError::Http(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, region: &str) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://ec2.{}.amazonaws.com", region),
        }
    }

    /// AMI for a region, falling back to the default
    pub fn ami(&self, region: &str) -> &str {
        self.config
            .ami_by_region
            .get(region)
            .map(String::as_str)
            .unwrap_or(&self.config.default_ami)
    }

    /// First-boot script that trusts `public_key` for the login user
    pub fn user_data(&self, public_key: &str) -> String {
        let user = &self.config.login_user;
        format!(
            "#!/bin/bash\n\
             mkdir -p /home/{user}/.ssh\n\
             echo \"{key}\" >> /home/{user}/.ssh/authorized_keys\n\
             chmod 600 /home/{user}/.ssh/authorized_keys\n\
             chown -R {user}:{user} /home/{user}/.ssh\n",
            user = user,
            key = public_key.trim(),
        )
    }

    async fn call(
        &self,
        credential: &CloudCredential,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<String> {
        let secret = credential.secret_key.as_deref().ok_or_else(|| {
            ForgeError::Config(format!("AWS credential {} has no secret key", credential.id))
        })?;

        params.push(("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), API_VERSION.to_string()));
        let body = canonical_query(&params);

        let endpoint = self.endpoint(&credential.region);
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| ForgeError::Config(format!("invalid EC2 endpoint {}: {}", endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ForgeError::Config(format!("EC2 endpoint {} has no host", endpoint)))
            }
        };

        let signer = Signer::new(&credential.access_key, secret, &credential.region, "ec2");
        let signed = signer.sign(
            &SignableRequest {
                method: "POST",
                host: &host,
                path: "/",
                query: "",
                content_type: CONTENT_TYPE,
                payload: body.as_bytes(),
            },
            Utc::now(),
        )?;

        debug!("[AWS] {} in {}", action, credential.region);
        let response = self
            .client
            .post(format!("{}/", endpoint))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Date", signed.amz_date)
            .header("Authorization", signed.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(api_error(action, status.as_u16(), &text));
        }
        Ok(text)
    }
}

/// Map an EC2 error document to a crate error
fn api_error(action: &str, status: u16, body: &str) -> ForgeError {
    let code = xml_value(body, "Code").unwrap_or_else(|| status.to_string());
    let message = xml_value(body, "Message").unwrap_or_default();
    let detail = format!("{} failed: {} {}", action, code, message);
    if code.contains("NotFound") {
        ForgeError::ProviderNotFound(detail)
    } else {
        ForgeError::Provider(detail)
    }
}

/// Element with text content and no children
fn leaf_element() -> Option<&'static Regex> {
    static LEAF: OnceLock<Option<Regex>> = OnceLock::new();
    LEAF.get_or_init(|| Regex::new(r"<(\w+)>\s*([^<]*?)\s*</(\w+)>").ok())
        .as_ref()
}

/// Text of the first `<tag>` element
fn xml_value(body: &str, tag: &str) -> Option<String> {
    leaf_element()?
        .captures_iter(body)
        .find(|c| &c[1] == tag && &c[3] == tag)
        .map(|c| c[2].to_string())
        .filter(|v| !v.is_empty())
}

fn instance_params(instance_id: &str) -> Vec<(String, String)> {
    vec![("InstanceId.1".to_string(), instance_id.to_string())]
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn kind(&self) -> Provider {
        Provider::Aws
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
        let user_data =
            base64::engine::general_purpose::STANDARD.encode(self.user_data(public_key));
        let params = vec![
            ("ImageId".to_string(), self.ami(&credential.region).to_string()),
            ("InstanceType".to_string(), spec.instance_type.clone()),
            ("MinCount".to_string(), "1".to_string()),
            ("MaxCount".to_string(), "1".to_string()),
            ("UserData".to_string(), user_data),
            ("TagSpecification.1.ResourceType".to_string(), "instance".to_string()),
            ("TagSpecification.1.Tag.1.Key".to_string(), "Name".to_string()),
            ("TagSpecification.1.Tag.1.Value".to_string(), spec.name.clone()),
        ];

        let body = self.call(credential, "RunInstances", params).await?;
        let instance_id = xml_value(&body, "instanceId").ok_or_else(|| {
            ForgeError::Provider("RunInstances response has no instanceId".to_string())
        })?;

        info!("[AWS] Launched {} as {}", spec.name, instance_id);
        Ok(instance_id)
    }

    async fn public_address(
        &self,
        credential: &CloudCredential,
        instance_id: &str,
    ) -> Result<Option<Address>> {
        let body = self
            .call(credential, "DescribeInstances", instance_params(instance_id))
            .await?;

        if xml_value(&body, "instanceId").is_none() {
            return Err(ForgeError::ProviderNotFound(format!(
                "instance {} not found",
                instance_id
            )));
        }

        Ok(xml_value(&body, "ipAddress").map(|public| Address {
            public,
            private: xml_value(&body, "privateIpAddress"),
        }))
    }

    async fn delete_instance(&self, credential: &CloudCredential, instance_id: &str) -> Result<()> {
        self.call(credential, "TerminateInstances", instance_params(instance_id))
            .await?;
        info!("[AWS] Terminating {}", instance_id);
        Ok(())
    }
}
