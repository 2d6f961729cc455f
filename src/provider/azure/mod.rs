//! # Azure Managed Disk Tags
//!
//! Writes PVC tags onto Azure managed disks.
//!
//! Tags are sanitized first (count, key characters, value length), merged
//! into the disk's live tags, and written back in one `PATCH` only if the
//! merged set differs from what is already there.

mod client;

pub use client::ArmDisks;

use super::common::{merge_tags, with_timeout};
use super::{ProviderError, TagUpdate, TaggingBackend, VolumeTagger};
use crate::constants::{AZURE_OPERATION_TIMEOUT_SECS, DEFAULT_CLOUD_CALL_TIMEOUT_SECS};
use crate::observability::metrics;
use crate::sanitize::{sanitize_key_for_azure, sanitize_labels_for_azure};
use crate::tags::Tags;
use crate::volume::{parse_azure_volume_id, AzureDiskId, VolumeRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Instrument};

/// Disk tag calls against Azure Resource Manager
#[async_trait]
pub trait AzureDiskApi: Send + Sync {
    async fn get_disk_tags(&self, disk: &AzureDiskId) -> Result<Tags>;

    /// Replace the disk's tags, waiting for the update to finish
    async fn set_disk_tags(&self, disk: &AzureDiskId, tags: &Tags) -> Result<()>;
}

/// Tagger over an [`AzureDiskApi`]
pub struct AzureTagger<C> {
    api: C,
    call_timeout: Duration,
    /// Bound on the PATCH plus its operation polling
    write_timeout: Duration,
}

impl<C> std::fmt::Debug for AzureTagger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureTagger")
            .field("call_timeout", &self.call_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: AzureDiskApi> AzureTagger<C> {
    #[must_use]
    pub fn new(api: C) -> Self {
        let call_timeout = Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS);
        Self {
            api,
            call_timeout,
            write_timeout: call_timeout + Duration::from_secs(AZURE_OPERATION_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, call_timeout: Duration, write_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self.write_timeout = write_timeout;
        self
    }
}

#[async_trait]
impl<C: AzureDiskApi> VolumeTagger for AzureTagger<C> {
    fn provider(&self) -> &'static str {
        "azure"
    }

    async fn update_tags(
        &self,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<TagUpdate, ProviderError> {
        let span = info_span!("azure.tags.update", volume.id = %volume.id);

        async move {
            let start = Instant::now();
            let sanitized = sanitize_labels_for_azure(tags)?;
            let removed_keys: Vec<String> =
                removed.iter().map(|key| sanitize_key_for_azure(key)).collect();
            debug!(tags = ?sanitized, removed = ?removed_keys, "Tags to apply to disk");

            let disk = parse_azure_volume_id(&volume.id)?;
            let existing =
                with_timeout("get disk tags", self.call_timeout, self.api.get_disk_tags(&disk))
                    .await?;

            let updated = merge_tags(&existing, &sanitized, &removed_keys);
            if updated == existing {
                debug!("Tags already set on disk");
                return Ok(TagUpdate::Unchanged);
            }

            with_timeout(
                "set disk tags",
                self.write_timeout,
                self.api.set_disk_tags(&disk, &updated),
            )
            .await?;

            info!(disk = %disk.name, "Updated tags on disk");
            metrics::observe_cloud_api_duration("azure", start.elapsed().as_secs_f64());
            Ok(TagUpdate::Applied)
        }
        .instrument(span)
        .await
    }
}

/// Build the Azure tagger
///
/// Uses Workload Identity when the federated token file is configured
/// (`AZURE_FEDERATED_TOKEN_FILE`), otherwise Managed Identity.
///
/// # Errors
/// Returns an error if the credential or HTTP client cannot be created
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn connect() -> Result<TaggingBackend> {
    info!("Running in Azure mode");

    let credential: Arc<dyn TokenCredential> =
        if std::env::var("AZURE_FEDERATED_TOKEN_FILE").is_ok() {
            info!("Using Azure Workload Identity authentication");
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: std::env::var("AZURE_CLIENT_ID").ok(),
                ..Default::default()
            };
            WorkloadIdentityCredential::new(Some(options))
                .context("Failed to create WorkloadIdentityCredential")?
        } else {
            info!("No federated token configured, using Managed Identity");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        };

    let api = ArmDisks::new(credential)?;
    Ok(TaggingBackend::Azure {
        disks: Arc::new(AzureTagger::new(api)),
    })
}
