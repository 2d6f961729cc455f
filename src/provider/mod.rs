//! # Provider Modules
//!
//! Cloud collaborators that read and write volume tags.
//!
//! Each cloud implements [`VolumeTagger`] on top of a small capability trait
//! (get tags, set tags) so the merge logic can be tested without a cloud:
//!
//! - [`aws`]: EBS volumes, EFS access points and FSx file systems/volumes
//! - [`gcp`]: Compute Engine persistent disks (labels)
//! - [`azure`]: Azure managed disks
//!
//! [`TaggingBackend`] holds the taggers for the configured cloud and picks
//! one per provisioner.

use crate::config::{Cloud, RuntimeSettings};
use crate::sanitize::SanitizeError;
use crate::tags::Tags;
use crate::volume::{ProvisionerKind, VolumeError, VolumeRef};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Common utilities shared across providers
pub mod common;

// Provider implementations
pub mod aws;
pub mod azure;
pub mod gcp;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cloud API call failed: {0:#}")]
    Api(#[from] anyhow::Error),
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
    #[error(transparent)]
    InvalidVolumeId(#[from] VolumeError),
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
}

/// Result of a tag update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagUpdate {
    /// At least one write was sent to the cloud
    Applied,
    /// The live tags already matched, nothing was written
    Unchanged,
}

/// Writes tags onto one kind of cloud volume
#[async_trait]
pub trait VolumeTagger: Send + Sync {
    /// Cloud name used in logs and metrics
    fn provider(&self) -> &'static str;

    /// Merge `tags` into the volume's live tags, then remove `removed`
    ///
    /// Implementations read the live tags first and skip writes that would not
    /// change anything. Keys in `removed` that are also in `tags` are kept.
    async fn update_tags(
        &self,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<TagUpdate, ProviderError>;
}

/// Taggers for the active cloud
#[derive(Clone)]
pub enum TaggingBackend {
    Aws {
        ebs: Arc<dyn VolumeTagger>,
        efs: Arc<dyn VolumeTagger>,
        fsx: Arc<dyn VolumeTagger>,
    },
    Gcp {
        disks: Arc<dyn VolumeTagger>,
    },
    Azure {
        disks: Arc<dyn VolumeTagger>,
    },
}

impl std::fmt::Debug for TaggingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggingBackend")
            .field("cloud", &self.cloud())
            .finish_non_exhaustive()
    }
}

impl TaggingBackend {
    /// Build the SDK/REST backed taggers for `cloud`
    ///
    /// # Errors
    /// Returns an error if the cloud credentials or clients cannot be set up
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn connect(cloud: Cloud, runtime: &RuntimeSettings) -> Result<Self> {
        match cloud {
            Cloud::Aws => aws::connect(runtime.region.as_deref()).await,
            Cloud::Gcp => gcp::connect(),
            Cloud::Azure => azure::connect(),
        }
    }

    #[must_use]
    pub fn cloud(&self) -> Cloud {
        match self {
            Self::Aws { .. } => Cloud::Aws,
            Self::Gcp { .. } => Cloud::Gcp,
            Self::Azure { .. } => Cloud::Azure,
        }
    }

    /// Tagger responsible for volumes of `kind`, if it belongs to this cloud
    #[must_use]
    pub fn tagger_for(&self, kind: ProvisionerKind) -> Option<&Arc<dyn VolumeTagger>> {
        match (self, kind) {
            (Self::Aws { ebs, .. }, ProvisionerKind::AwsEbsCsi | ProvisionerKind::AwsEbsLegacy) => {
                Some(ebs)
            }
            (Self::Aws { efs, .. }, ProvisionerKind::AwsEfsCsi) => Some(efs),
            (Self::Aws { fsx, .. }, ProvisionerKind::AwsFsxCsi) => Some(fsx),
            (Self::Gcp { disks }, ProvisionerKind::GcpPdCsi | ProvisionerKind::GcpPdLegacy) => {
                Some(disks)
            }
            (Self::Azure { disks }, ProvisionerKind::AzureDiskCsi) => Some(disks),
            _ => None,
        }
    }
}
