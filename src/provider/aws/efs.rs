//! EFS tag calls for access points.

use super::AwsTagApi;
use crate::tags::Tags;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_efs::types::Tag;
use aws_sdk_efs::Client as EfsClient;

/// EFS access point tags
pub struct EfsAccessPointTags {
    client: EfsClient,
}

impl std::fmt::Debug for EfsAccessPointTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EfsAccessPointTags").finish_non_exhaustive()
    }
}

impl EfsAccessPointTags {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: EfsClient::new(sdk_config),
        }
    }
}

#[async_trait]
impl AwsTagApi for EfsAccessPointTags {
    async fn get_tags(&self, resource: &str) -> Result<Tags> {
        let output = self
            .client
            .list_tags_for_resource()
            .resource_id(resource)
            .send()
            .await
            .with_context(|| format!("Failed to list tags of EFS access point {resource}"))?;

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
            .context("Failed to build EFS tags")?;

        self.client
            .tag_resource()
            .resource_id(resource)
            .set_tags(Some(tags))
            .send()
            .await
            .with_context(|| format!("Failed to tag EFS access point {resource}"))?;
        Ok(())
    }

    async fn untag_resource(&self, resource: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_resource()
            .resource_id(resource)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .with_context(|| format!("Failed to untag EFS access point {resource}"))?;
        Ok(())
    }
}
