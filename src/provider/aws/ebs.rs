//! EC2 tag calls for EBS volumes.

use super::AwsTagApi;
use crate::tags::Tags;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ec2::types::{Filter, Tag};
use aws_sdk_ec2::Client as Ec2Client;

/// EBS volume tags through the EC2 API
pub struct Ec2VolumeTags {
    client: Ec2Client,
}

impl std::fmt::Debug for Ec2VolumeTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2VolumeTags").finish_non_exhaustive()
    }
}

impl Ec2VolumeTags {
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Ec2Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl AwsTagApi for Ec2VolumeTags {
    async fn get_tags(&self, resource: &str) -> Result<Tags> {
        let output = self
            .client
            .describe_tags()
            .filters(Filter::builder().name("resource-id").values(resource).build())
            .send()
            .await
            .with_context(|| format!("Failed to describe tags of EBS volume {resource}"))?;

        Ok(output
            .tags()
            .iter()
            .filter_map(|tag| {
                let key = tag.key()?;
                Some((key.to_string(), tag.value().unwrap_or_default().to_string()))
            })
            .collect())
    }

    async fn tag_resource(&self, resource: &str, tags: &Tags) -> Result<()> {
        let tags = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        self.client
            .create_tags()
            .resources(resource)
            .set_tags(Some(tags))
            .send()
            .await
            .with_context(|| format!("Failed to create tags on EBS volume {resource}"))?;
        Ok(())
    }

    async fn untag_resource(&self, resource: &str, keys: &[String]) -> Result<()> {
        let tags = keys.iter().map(|key| Tag::builder().key(key).build()).collect();

        self.client
            .delete_tags()
            .resources(resource)
            .set_tags(Some(tags))
            .send()
            .await
            .with_context(|| format!("Failed to delete tags from EBS volume {resource}"))?;
        Ok(())
    }
}
