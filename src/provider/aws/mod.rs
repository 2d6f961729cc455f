//! # AWS Volume Tagging
//!
//! Tags EBS volumes, EFS access points and FSx file systems.
//!
//! All three services expose the same shape (list tags, tag, untag) behind
//! [`AwsTagApi`]; [`AwsTagger`] adds the compare-then-write logic on top:
//! it reads the live tags, writes only the keys whose value changes, and
//! removes only keys that are actually present.
//!
//! Credentials come from the default AWS provider chain (IRSA, instance
//! profile, environment). Throttling and transient errors are retried by the
//! SDK's standard retry strategy with exponential backoff.

mod ebs;
mod efs;
mod fsx;

pub use ebs::Ec2VolumeTags;
pub use efs::EfsAccessPointTags;
pub use fsx::FsxTags;

use super::common::{changed_tags, present_keys, with_timeout};
use super::{ProviderError, TagUpdate, TaggingBackend, VolumeTagger};
use crate::config::cli::validate_aws_region;
use crate::constants::{
    AWS_INITIAL_BACKOFF_SECS, AWS_MAX_BACKOFF_SECS, AWS_MAX_RETRY_ATTEMPTS,
    DEFAULT_CLOUD_CALL_TIMEOUT_SECS,
};
use crate::observability::metrics;
use crate::sanitize::{sanitize_keys_for_aws, sanitize_tags_for_aws};
use crate::tags::Tags;
use crate::volume::VolumeRef;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Instrument};

/// Tag operations of one AWS service
#[async_trait]
pub trait AwsTagApi: Send + Sync {
    /// Identifier the tagging calls expect for `volume_id`
    ///
    /// EC2 and EFS tag by ID; FSx needs the resource ARN.
    async fn resolve_resource(&self, volume_id: &str) -> Result<String> {
        Ok(volume_id.to_string())
    }

    async fn get_tags(&self, resource: &str) -> Result<Tags>;

    async fn tag_resource(&self, resource: &str, tags: &Tags) -> Result<()>;

    async fn untag_resource(&self, resource: &str, keys: &[String]) -> Result<()>;
}

/// Compare-then-write tagger over an [`AwsTagApi`]
pub struct AwsTagger<A> {
    api: A,
    provider: &'static str,
    call_timeout: Duration,
}

impl<A> std::fmt::Debug for AwsTagger<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsTagger")
            .field("provider", &self.provider)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl<A: AwsTagApi> AwsTagger<A> {
    #[must_use]
    pub fn new(provider: &'static str, api: A) -> Self {
        Self {
            api,
            provider,
            call_timeout: Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

#[async_trait]
impl<A: AwsTagApi> VolumeTagger for AwsTagger<A> {
    fn provider(&self) -> &'static str {
        self.provider
    }

    async fn update_tags(
        &self,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<TagUpdate, ProviderError> {
        let span = info_span!(
            "aws.tags.update",
            provider = self.provider,
            volume.id = %volume.id
        );

        async move {
            let start = Instant::now();
            let desired = sanitize_tags_for_aws(tags);
            let removed_keys = sanitize_keys_for_aws(removed);

            let resource = with_timeout(
                "resolve resource",
                self.call_timeout,
                self.api.resolve_resource(&volume.id),
            )
            .await?;
            let current =
                with_timeout("get tags", self.call_timeout, self.api.get_tags(&resource)).await?;

            let to_add = changed_tags(&current, &desired);
            let to_remove = present_keys(&current, &desired, &removed_keys);
            if to_add.is_empty() && to_remove.is_empty() {
                debug!("Volume tags already up to date");
                return Ok(TagUpdate::Unchanged);
            }

            if !to_add.is_empty() {
                info!(tags = ?to_add, "Adding volume tags");
                with_timeout(
                    "tag resource",
                    self.call_timeout,
                    self.api.tag_resource(&resource, &to_add),
                )
                .await?;
            }
            if !to_remove.is_empty() {
                info!(keys = ?to_remove, "Removing volume tags");
                with_timeout(
                    "untag resource",
                    self.call_timeout,
                    self.api.untag_resource(&resource, &to_remove),
                )
                .await?;
            }

            metrics::observe_cloud_api_duration(self.provider, start.elapsed().as_secs_f64());
            Ok(TagUpdate::Applied)
        }
        .instrument(span)
        .await
    }
}

/// Build the AWS taggers from the default credential chain
///
/// # Errors
/// Returns an error if no region can be resolved or the region is malformed
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub async fn connect(region: Option<&str>) -> Result<TaggingBackend> {
    let retry_config = RetryConfig::standard()
        .with_max_attempts(AWS_MAX_RETRY_ATTEMPTS)
        .with_initial_backoff(Duration::from_secs(AWS_INITIAL_BACKOFF_SECS))
        .with_max_backoff(Duration::from_secs(AWS_MAX_BACKOFF_SECS));
    let timeout_config = TimeoutConfig::builder()
        .operation_timeout(Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(retry_config)
        .timeout_config(timeout_config);
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    let sdk_config = loader.load().await;

    // Falls back to the instance metadata region when none was given
    let resolved = sdk_config
        .region()
        .map(|region| region.as_ref().to_string())
        .context("Unable to determine the AWS region, set --region or AWS_REGION")?;
    validate_aws_region(&resolved)?;
    info!(region = %resolved, "Running in AWS mode");

    Ok(TaggingBackend::Aws {
        ebs: Arc::new(AwsTagger::new("aws-ebs", Ec2VolumeTags::new(&sdk_config))),
        efs: Arc::new(AwsTagger::new("aws-efs", EfsAccessPointTags::new(&sdk_config))),
        fsx: Arc::new(AwsTagger::new("aws-fsx", FsxTags::new(&sdk_config))),
    })
}
