//! Common test utilities for the integration tests
//!
//! PVC/PV builders plus in-memory fakes for the PersistentVolume lookup and
//! the cloud taggers.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    AWSElasticBlockStoreVolumeSource, CSIPersistentVolumeSource, GCEPersistentDiskVolumeSource,
    PersistentVolume,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeSpec,
};
use k8s_pvc_tagger::provider::{ProviderError, TagUpdate, VolumeTagger};
use k8s_pvc_tagger::{Tags, VolumeRef};
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Builder for PersistentVolumeClaims
#[derive(Debug, Clone)]
pub struct PvcBuilder {
    pvc: PersistentVolumeClaim,
}

impl PvcBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            pvc: PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some("default".to_string()),
                    resource_version: Some("1".to_string()),
                    ..ObjectMeta::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    storage_class_name: Some("gp3".to_string()),
                    ..PersistentVolumeClaimSpec::default()
                }),
                ..PersistentVolumeClaim::default()
            },
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.pvc.metadata.namespace = Some(namespace.to_string());
        self
    }

    pub fn resource_version(mut self, version: &str) -> Self {
        self.pvc.metadata.resource_version = Some(version.to_string());
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pvc
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pvc
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn provisioner(self, provisioner: &str) -> Self {
        self.annotation("volume.kubernetes.io/storage-provisioner", provisioner)
    }

    pub fn bound_to(mut self, volume_name: &str) -> Self {
        if let Some(spec) = self.pvc.spec.as_mut() {
            spec.volume_name = Some(volume_name.to_string());
        }
        self
    }

    pub fn terminating(mut self) -> Self {
        self.pvc.metadata.deletion_timestamp = Some(
            serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z"))
                .expect("valid timestamp"),
        );
        self
    }

    pub fn build(self) -> PersistentVolumeClaim {
        self.pvc
    }
}

fn pv(name: &str, spec: PersistentVolumeSpec) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(spec),
        ..PersistentVolume::default()
    }
}

/// PV backed by a CSI volume handle
pub fn csi_pv(name: &str, driver: &str, handle: &str) -> PersistentVolume {
    pv(
        name,
        PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: driver.to_string(),
                volume_handle: handle.to_string(),
                ..CSIPersistentVolumeSource::default()
            }),
            ..PersistentVolumeSpec::default()
        },
    )
}

/// PV backed by the in-tree EBS plugin
pub fn ebs_pv(name: &str, volume_id: &str) -> PersistentVolume {
    pv(
        name,
        PersistentVolumeSpec {
            aws_elastic_block_store: Some(AWSElasticBlockStoreVolumeSource {
                volume_id: volume_id.to_string(),
                ..AWSElasticBlockStoreVolumeSource::default()
            }),
            ..PersistentVolumeSpec::default()
        },
    )
}

/// PV backed by the in-tree GCE PD plugin
pub fn gce_pv(name: &str, pd_name: &str) -> PersistentVolume {
    pv(
        name,
        PersistentVolumeSpec {
            gce_persistent_disk: Some(GCEPersistentDiskVolumeSource {
                pd_name: pd_name.to_string(),
                ..GCEPersistentDiskVolumeSource::default()
            }),
            ..PersistentVolumeSpec::default()
        },
    )
}

/// In-memory PersistentVolume store
#[derive(Debug, Default)]
pub struct FakeVolumes {
    volumes: HashMap<String, PersistentVolume>,
}

impl FakeVolumes {
    pub fn with(mut self, volume: PersistentVolume) -> Self {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.volumes.insert(name, volume);
        self
    }
}

#[async_trait]
impl k8s_pvc_tagger::volume::PersistentVolumeLookup for FakeVolumes {
    async fn get_persistent_volume(
        &self,
        name: &str,
    ) -> Result<Option<PersistentVolume>, kube::Error> {
        Ok(self.volumes.get(name).cloned())
    }
}

/// One recorded `update_tags` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub volume_id: String,
    pub tags: Tags,
    pub removed: Vec<String>,
}

/// Tagger that records calls and answers with a fixed result
#[derive(Debug)]
pub struct RecordingTagger {
    name: &'static str,
    fail: bool,
    unchanged: bool,
    calls: Mutex<Vec<TagCall>>,
}

impl RecordingTagger {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail: false,
            unchanged: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn unchanged(name: &'static str) -> Self {
        Self {
            unchanged: true,
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<TagCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl VolumeTagger for RecordingTagger {
    fn provider(&self) -> &'static str {
        self.name
    }

    async fn update_tags(
        &self,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<TagUpdate, ProviderError> {
        self.calls.lock().expect("calls lock").push(TagCall {
            volume_id: volume.id.clone(),
            tags: tags.clone(),
            removed: removed.to_vec(),
        });
        if self.fail {
            return Err(ProviderError::Api(anyhow::anyhow!("throttled")));
        }
        if self.unchanged {
            return Ok(TagUpdate::Unchanged);
        }
        Ok(TagUpdate::Applied)
    }
}
