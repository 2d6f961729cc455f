//! FSx tag calls for file systems and volumes.

use super::AwsTagApi;
use crate::tags::Tags;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_fsx::types::Tag;
use aws_sdk_fsx::Client as FsxClient;
use tracing::debug;

/// FSx tags, addressed by resource ARN
pub struct FsxTags {
    client: FsxClient,
}

impl std::fmt::Debug for FsxTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsxTags").finish_non_exhaustive()
    }
}

impl FsxTags {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: FsxClient::new(sdk_config),
        }
    }
}

#[async_trait]
impl AwsTagApi for FsxTags {
    /// `fsvol-` handles name an FSx volume, anything else a file system
    async fn resolve_resource(&self, volume_id: &str) -> Result<String> {
        let arn = if volume_id.starts_with("fsvol-") {
            let output = self
                .client
                .describe_volumes()
                .volume_ids(volume_id)
                .send()
                .await
                .with_context(|| format!("Failed to describe FSx volume {volume_id}"))?;
            output
                .volumes()
                .first()
                .and_then(|volume| volume.resource_arn())
                .map(ToString::to_string)
        } else {
            let output = self
                .client
                .describe_file_systems()
                .file_system_ids(volume_id)
                .send()
                .await
                .with_context(|| format!("Failed to describe FSx file system {volume_id}"))?;
            output
                .file_systems()
                .first()
                .and_then(|file_system| file_system.resource_arn())
                .map(ToString::to_string)
        };

        let arn = arn.with_context(|| format!("No resource ARN found for FSx {volume_id}"))?;
        debug!(volume_id = volume_id, arn = %arn, "Resolved FSx resource ARN");
        Ok(arn)
    }

    async fn get_tags(&self, resource: &str) -> Result<Tags> {
        let output = self
            .client
            .list_tags_for_resource()
            .resource_arn(resource)
            .send()
            .await
            .with_context(|| format!("Failed to list tags of FSx resource {resource}"))?;

        Ok(output
            .tags()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect())
    }

    async fn tag_resource(&self, resource: &str, tags: &Tags) -> Result<()> {
        let tags = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to build FSx tags")?;

        self.client
            .tag_resource()
            .resource_arn(resource)
            .set_tags(Some(tags))
            .send()
            .await
            .with_context(|| format!("Failed to tag FSx resource {resource}"))?;
        Ok(())
    }

    async fn untag_resource(&self, resource: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_resource()
            .resource_arn(resource)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .with_context(|| format!("Failed to untag FSx resource {resource}"))?;
        Ok(())
    }
}
