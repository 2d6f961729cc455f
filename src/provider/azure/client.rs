//! Azure Resource Manager disk client
//!
//! Calls the `Microsoft.Compute/disks` REST API directly with reqwest and a
//! bearer token from the configured `TokenCredential`. Tag updates are long
//! running operations: a `202 Accepted` is followed by polling the
//! `Azure-AsyncOperation` (or `Location`) URL until the update settles.
//!
//! References:
//! - [Disks - Get](https://learn.microsoft.com/rest/api/compute/disks/get)
//! - [Disks - Update](https://learn.microsoft.com/rest/api/compute/disks/update)
//! - [Async operations](https://learn.microsoft.com/azure/azure-resource-manager/management/async-operations)

use super::AzureDiskApi;
use crate::constants::{
    AZURE_DISK_API_VERSION, AZURE_OPERATION_POLL_INTERVAL_SECS, AZURE_OPERATION_TIMEOUT_SECS,
    AZURE_RESOURCE_MANAGER_SCOPE, AZURE_RESOURCE_MANAGER_URL, DEFAULT_CLOUD_CALL_TIMEOUT_SECS,
};
use crate::tags::Tags;
use crate::volume::AzureDiskId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

/// Disk resource, trimmed to the fields the tagger reads
#[derive(Debug, Deserialize)]
struct DiskResource {
    #[serde(default)]
    tags: Option<BTreeMap<String, Option<String>>>,
}

/// Body of a disk `PATCH`
#[derive(Debug, Serialize)]
struct DiskUpdate<'a> {
    tags: &'a Tags,
}

/// Status document returned by an `Azure-AsyncOperation` URL
#[derive(Debug, Deserialize)]
struct AsyncOperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ArmErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct ArmErrorResponse {
    error: ArmErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ArmErrorDetails {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Where to poll a long running update
#[derive(Debug, PartialEq, Eq)]
enum PollTarget {
    AsyncOperation(String),
    Location(String),
}

/// Disk endpoints for one subscription
#[derive(Debug)]
struct SubscriptionDisks {
    disks_base: String,
}

impl SubscriptionDisks {
    fn new(base_url: &str, subscription: &str) -> Self {
        Self {
            disks_base: format!("{base_url}/subscriptions/{subscription}"),
        }
    }

    fn disk_url(&self, disk: &AzureDiskId) -> String {
        format!(
            "{}/resourceGroups/{}/providers/Microsoft.Compute/disks/{}?api-version={AZURE_DISK_API_VERSION}",
            self.disks_base, disk.resource_group, disk.name
        )
    }
}

/// ARM disk client with per-subscription endpoints cached on first use
pub struct ArmDisks {
    http_client: Client,
    credential: Arc<dyn TokenCredential>,
    base_url: String,
    subscriptions: RwLock<HashMap<String, Arc<SubscriptionDisks>>>,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl std::fmt::Debug for ArmDisks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmDisks")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl ArmDisks {
    /// Create a new ARM disk client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn new(credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            credential,
            base_url: AZURE_RESOURCE_MANAGER_URL.to_string(),
            subscriptions: RwLock::new(HashMap::new()),
            poll_interval: Duration::from_secs(AZURE_OPERATION_POLL_INTERVAL_SECS),
            operation_timeout: Duration::from_secs(AZURE_OPERATION_TIMEOUT_SECS),
        })
    }

    fn for_subscription(&self, subscription: &str) -> Result<Arc<SubscriptionDisks>> {
        {
            let cache = self
                .subscriptions
                .read()
                .map_err(|e| anyhow::anyhow!("Azure subscription cache lock poisoned: {e}"))?;
            if let Some(client) = cache.get(subscription) {
                return Ok(Arc::clone(client));
            }
        }

        let mut cache = self
            .subscriptions
            .write()
            .map_err(|e| anyhow::anyhow!("Azure subscription cache lock poisoned: {e}"))?;
        let client = cache
            .entry(subscription.to_string())
            .or_insert_with(|| {
                debug!(subscription = subscription, "Creating disks client for subscription");
                Arc::new(SubscriptionDisks::new(&self.base_url, subscription))
            });
        Ok(Arc::clone(client))
    }

    async fn access_token(&self) -> Result<String> {
        let token = self
            .credential
            .get_token(
                &[AZURE_RESOURCE_MANAGER_SCOPE],
                Some(TokenRequestOptions::default()),
            )
            .await
            .context("Failed to get Azure Resource Manager token")?;
        Ok(token.token.secret().to_string())
    }

    async fn poll_until_done(&self, target: PollTarget) -> Result<()> {
        let deadline = Instant::now() + self.operation_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "Disk update did not complete within {}s",
                    self.operation_timeout.as_secs()
                );
            }

            let token = self.access_token().await?;
            let url = match &target {
                PollTarget::AsyncOperation(url) | PollTarget::Location(url) => url,
            };
            let response = self
                .http_client
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .context("Failed to poll disk update")?;
            let status = response.status();

            match &target {
                PollTarget::AsyncOperation(_) => {
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(error_from_response(status, &body));
                    }
                    let operation: AsyncOperationStatus = response
                        .json()
                        .await
                        .context("Failed to parse async operation status")?;
                    match operation.status.as_str() {
                        "Succeeded" => return Ok(()),
                        "Failed" | "Canceled" => {
                            let detail = operation
                                .error
                                .map(|e| format!("{}: {}", e.code, e.message))
                                .unwrap_or_default();
                            anyhow::bail!("Disk update {}: {detail}", operation.status);
                        }
                        other => debug!(status = other, "Disk update still in progress"),
                    }
                }
                PollTarget::Location(_) => {
                    if status == StatusCode::ACCEPTED {
                        debug!("Disk update still in progress");
                    } else if status.is_success() {
                        return Ok(());
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(error_from_response(status, &body));
                    }
                }
            }
        }
    }
}

fn poll_target(headers: &HeaderMap) -> Option<PollTarget> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };
    header(ASYNC_OPERATION_HEADER)
        .map(PollTarget::AsyncOperation)
        .or_else(|| header(LOCATION.as_str()).map(PollTarget::Location))
}

/// Tags from the wire, where values may be `null`
fn tags_from_resource(resource: DiskResource) -> Tags {
    resource
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.unwrap_or_default()))
        .collect()
}

fn error_from_response(status: StatusCode, error_text: &str) -> anyhow::Error {
    if let Ok(error_response) = serde_json::from_str::<ArmErrorResponse>(error_text) {
        anyhow::anyhow!(
            "Azure API error: {} (code: {}, status: {})",
            error_response.error.message,
            error_response.error.code,
            status.as_u16()
        )
    } else {
        anyhow::anyhow!("HTTP {} (status: {}): {}", status.as_u16(), status, error_text)
    }
}

#[async_trait]
impl AzureDiskApi for ArmDisks {
    async fn get_disk_tags(&self, disk: &AzureDiskId) -> Result<Tags> {
        let url = self.for_subscription(&disk.subscription)?.disk_url(disk);
        let token = self.access_token().await?;

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to get disk {}", disk.name))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body))
                .with_context(|| format!("Failed to get disk {}", disk.name));
        }

        let resource: DiskResource = response
            .json()
            .await
            .context("Failed to parse disk response")?;
        Ok(tags_from_resource(resource))
    }

    async fn set_disk_tags(&self, disk: &AzureDiskId, tags: &Tags) -> Result<()> {
        let url = self.for_subscription(&disk.subscription)?.disk_url(disk);
        let token = self.access_token().await?;

        let response = self
            .http_client
            .patch(&url)
            .bearer_auth(token)
            .json(&DiskUpdate { tags })
            .send()
            .await
            .with_context(|| format!("Failed to update disk {}", disk.name))?;
        let status = response.status();

        if status == StatusCode::ACCEPTED {
            match poll_target(response.headers()) {
                Some(target) => self
                    .poll_until_done(target)
                    .await
                    .with_context(|| format!("Failed to update disk {}", disk.name)),
                None => {
                    warn!(disk = %disk.name, "Disk update accepted without a status URL");
                    Ok(())
                }
            }
        } else if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(error_from_response(status, &body))
                .with_context(|| format!("Failed to update disk {}", disk.name))
        }
    }
}
