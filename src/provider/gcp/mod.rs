//! # GCP Persistent Disk Labels
//!
//! Writes PVC tags as Compute Engine disk labels.
//!
//! Labels are replaced as a whole set with `disks.setLabels`, guarded by the
//! disk's label fingerprint, so one update merges additions and removals into
//! a single write. The returned zone operation is polled until it is `DONE`.

mod client;

pub use client::ComputeRest;

use super::common::{merge_tags, with_timeout};
use super::{ProviderError, TagUpdate, TaggingBackend, VolumeTagger};
use crate::constants::{
    DEFAULT_CLOUD_CALL_TIMEOUT_SECS, GCP_OPERATION_POLL_INTERVAL_SECS, GCP_OPERATION_TIMEOUT_SECS,
};
use crate::observability::metrics;
use crate::sanitize::{sanitize_keys_for_gcp, sanitize_labels_for_gcp};
use crate::tags::Tags;
use crate::volume::{parse_gcp_volume_id, GcpDiskId, VolumeRef};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Instrument};

/// Disk resource, reduced to the fields the tagger needs
///
/// API Reference: https://cloud.google.com/compute/docs/reference/rest/v1/disks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Option<Tags>,
    #[serde(default)]
    pub label_fingerprint: String,
}

/// Request body of `disks.setLabels`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLabelsRequest {
    pub labels: Tags,
    pub label_fingerprint: String,
}

/// Zone or region operation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationErrorEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    fn failure(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        let messages: Vec<String> = error
            .errors
            .iter()
            .map(|entry| format!("{}: {}", entry.code, entry.message))
            .collect();
        Some(messages.join("; "))
    }
}

/// Compute Engine disk calls
#[async_trait]
pub trait GcpDiskApi: Send + Sync {
    async fn get_disk(&self, disk: &GcpDiskId) -> Result<Disk>;

    async fn set_disk_labels(&self, disk: &GcpDiskId, request: &SetLabelsRequest)
        -> Result<Operation>;

    async fn get_operation(&self, disk: &GcpDiskId, operation: &str) -> Result<Operation>;
}

/// Label tagger over a [`GcpDiskApi`]
pub struct GcpTagger<C> {
    api: C,
    call_timeout: Duration,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl<C> std::fmt::Debug for GcpTagger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpTagger")
            .field("call_timeout", &self.call_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: GcpDiskApi> GcpTagger<C> {
    #[must_use]
    pub fn new(api: C) -> Self {
        Self {
            api,
            call_timeout: Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(GCP_OPERATION_POLL_INTERVAL_SECS),
            operation_timeout: Duration::from_secs(GCP_OPERATION_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_polling(mut self, poll_interval: Duration, operation_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.operation_timeout = operation_timeout;
        self
    }

    async fn wait_for_operation(
        &self,
        disk: &GcpDiskId,
        operation: Operation,
    ) -> Result<(), ProviderError> {
        if operation.is_done() {
            return operation_result(&operation);
        }

        let poll = async {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                let current = self.api.get_operation(disk, &operation.name).await?;
                if current.is_done() {
                    return Ok(current);
                }
                debug!(operation = %operation.name, status = %current.status, "Waiting for label operation");
            }
        };

        let finished = with_timeout("label operation", self.operation_timeout, poll).await?;
        operation_result(&finished)
    }
}

fn operation_result(operation: &Operation) -> Result<(), ProviderError> {
    match operation.failure() {
        Some(message) => Err(ProviderError::Api(anyhow::anyhow!(
            "label operation {} failed: {message}",
            operation.name
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl<C: GcpDiskApi> VolumeTagger for GcpTagger<C> {
    fn provider(&self) -> &'static str {
        "gcp"
    }

    async fn update_tags(
        &self,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<TagUpdate, ProviderError> {
        let span = info_span!("gcp.labels.update", volume.id = %volume.id);

        async move {
            let start = Instant::now();
            let disk_id = parse_gcp_volume_id(&volume.id)?;
            let labels = sanitize_labels_for_gcp(tags);
            let removed_keys = sanitize_keys_for_gcp(removed);
            debug!(labels = ?labels, removed = ?removed_keys, "Labels to apply to PD");

            let disk = with_timeout("get disk", self.call_timeout, self.api.get_disk(&disk_id)).await?;
            let current = disk.labels.unwrap_or_default();
            let updated = merge_tags(&current, &labels, &removed_keys);
            if updated == current {
                debug!("Labels already set on PD");
                return Ok(TagUpdate::Unchanged);
            }

            let request = SetLabelsRequest {
                labels: updated,
                label_fingerprint: disk.label_fingerprint,
            };
            let operation = with_timeout(
                "set disk labels",
                self.call_timeout,
                self.api.set_disk_labels(&disk_id, &request),
            )
            .await?;
            self.wait_for_operation(&disk_id, operation).await?;

            info!(disk = %disk_id.name, "Updated labels on PD");
            metrics::observe_cloud_api_duration("gcp", start.elapsed().as_secs_f64());
            Ok(TagUpdate::Applied)
        }
        .instrument(span)
        .await
    }
}

/// Build the GCP tagger using Workload Identity credentials
///
/// # Errors
/// Returns an error if the HTTP client cannot be created
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn connect() -> Result<TaggingBackend> {
    info!("Running in GCP mode");
    let api = ComputeRest::new()?;
    Ok(TaggingBackend::Gcp {
        disks: Arc::new(GcpTagger::new(api)),
    })
}
