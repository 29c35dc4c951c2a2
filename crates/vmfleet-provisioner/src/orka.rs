//! Orka provisioner implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use vmfleet_core::provisioner::{Deletion, Provisioner, VmSpec};
use vmfleet_core::{Error, Result, VmId};

/// Provisioner backed by an Orka cluster's REST API.
pub struct OrkaProvisioner {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl OrkaProvisioner {
    /// Create a provisioner talking to the Orka API at `base_url`.
    pub fn new(base_url: Url, token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("vmfleet")
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url, token))
    }

    /// Create with a custom HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: Url, token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Internal(format!("Invalid Orka URL for {}: {}", path, e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    orka_vm_name: &'a str,
    vm_metadata: VmMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct VmMetadata<'a> {
    items: Vec<MetadataItem<'a>>,
}

#[derive(Debug, Serialize)]
struct MetadataItem<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    vm_id: String,
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    orka_vm_name: &'a str,
}

impl<'a> DeployRequest<'a> {
    fn from_spec(spec: &'a VmSpec) -> Self {
        Self {
            orka_vm_name: &spec.image,
            vm_metadata: VmMetadata {
                items: spec
                    .metadata
                    .iter()
                    .map(|(key, value)| MetadataItem {
                        key: key.as_str(),
                        value: value.as_str(),
                    })
                    .collect(),
            },
        }
    }
}

#[async_trait]
impl Provisioner for OrkaProvisioner {
    fn name(&self) -> &'static str {
        "orka"
    }

    async fn create(&self, spec: &VmSpec) -> Result<VmId> {
        let url = self.endpoint("resources/vm/deploy")?;
        info!(runner = %spec.runner_name, image = %spec.image, "Deploying Orka VM");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&DeployRequest::from_spec(spec))
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provisioning(format!(
                "Orka deploy failed ({}): {}",
                status, text
            )));
        }

        let deployed: DeployResponse = response
            .json()
            .await
            .map_err(|e| Error::Provisioning(format!("Invalid Orka deploy response: {}", e)))?;

        if deployed.vm_id.is_empty() {
            return Err(Error::Provisioning(
                "Orka deploy response carried no VM id".to_string(),
            ));
        }

        debug!(runner = %spec.runner_name, vm_id = %deployed.vm_id, "Orka VM deployed");
        Ok(VmId::from(deployed.vm_id))
    }

    async fn delete_all_instances(&self, vm_id: &VmId) -> Result<Deletion> {
        let url = self.endpoint("resources/vm/purge")?;

        let response = self
            .request(reqwest::Method::DELETE, url)
            .json(&PurgeRequest {
                orka_vm_name: vm_id.as_str(),
            })
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            status if status.is_success() => Ok(Deletion::Deleted),
            StatusCode::NOT_FOUND => Ok(Deletion::NotFound),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::Provisioning(format!(
                    "Orka purge of {} failed ({}): {}",
                    vm_id, status, text
                )))
            }
        }
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Orka request timed out: {}", e))
    } else {
        Error::Provisioning(format!("Orka request failed: {}", e))
    }
}
