//! GCP Compute Engine REST Client
//!
//! Native REST implementation of the few `compute/v1` disk calls the tagger
//! needs. Uses reqwest for HTTP requests and an OAuth2 access token from the
//! GCE metadata server (Workload Identity).
//!
//! References:
//! - [Compute Engine disks](https://cloud.google.com/compute/docs/reference/rest/v1/disks)
//! - [Zone operations](https://cloud.google.com/compute/docs/reference/rest/v1/zoneOperations)

use super::{Disk, GcpDiskApi, Operation, SetLabelsRequest};
use crate::constants::{
    DEFAULT_CLOUD_CALL_TIMEOUT_SECS, GCP_COMPUTE_BASE_URL, GCP_METADATA_TOKEN_URL,
};
use crate::volume::GcpDiskId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 token response from the metadata server
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// GCP API error response
#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GcpErrorDetails {
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Compute Engine REST client
pub struct ComputeRest {
    http_client: Client,
    base_url: String,
    token: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for ComputeRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeRest")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ComputeRest {
    /// Create a new Compute Engine REST client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn new() -> Result<Self> {
        // Create HTTP client with rustls (already configured in Cargo.toml)
        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: GCP_COMPUTE_BASE_URL.to_string(),
            token: RwLock::new(None),
        })
    }

    /// Current access token, fetched from the metadata server when missing or expiring
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }
        let response = self
            .http_client
            .get(GCP_METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Metadata server not available, is Workload Identity enabled?")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metadata server returned status {status}: {body}");
        }
        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response from metadata server")?;
        debug!("Retrieved access token from metadata server");

        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&SetLabelsRequest>,
    ) -> Result<T> {
        let token = self.access_token().await?;
        let mut request = self
            .http_client
            .request(method, url)
            .bearer_auth(token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("GCP request failed")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &error_text));
        }
        response
            .json()
            .await
            .context("Failed to parse GCP response")
    }
}

fn disk_url(base_url: &str, disk: &GcpDiskId) -> String {
    format!(
        "{base_url}/projects/{}/{}/{}/disks/{}",
        disk.project, disk.scope, disk.location, disk.name
    )
}

fn operation_url(base_url: &str, disk: &GcpDiskId, operation: &str) -> String {
    format!(
        "{base_url}/projects/{}/{}/{}/operations/{operation}",
        disk.project, disk.scope, disk.location
    )
}

/// Turn a GCP error response into an error, preferring the structured message
fn error_from_response(status: StatusCode, error_text: &str) -> anyhow::Error {
    if let Ok(error_response) = serde_json::from_str::<GcpErrorResponse>(error_text) {
        anyhow::anyhow!(
            "GCP API error: {} (code: {}, status: {})",
            error_response.error.message,
            error_response.error.code,
            error_response.error.status
        )
    } else {
        anyhow::anyhow!("HTTP {} (status: {}): {}", status.as_u16(), status, error_text)
    }
}

#[async_trait]
impl GcpDiskApi for ComputeRest {
    async fn get_disk(&self, disk: &GcpDiskId) -> Result<Disk> {
        self.request(Method::GET, &disk_url(&self.base_url, disk), None)
            .await
            .with_context(|| format!("Failed to get disk {}", disk.name))
    }

    async fn set_disk_labels(
        &self,
        disk: &GcpDiskId,
        request: &SetLabelsRequest,
    ) -> Result<Operation> {
        let url = format!("{}/setLabels", disk_url(&self.base_url, disk));
        self.request(Method::POST, &url, Some(request))
            .await
            .with_context(|| format!("Failed to set labels on disk {}", disk.name))
    }

    async fn get_operation(&self, disk: &GcpDiskId, operation: &str) -> Result<Operation> {
        self.request(Method::GET, &operation_url(&self.base_url, disk, operation), None)
            .await
            .with_context(|| format!("Failed to get operation {operation}"))
    }
}
