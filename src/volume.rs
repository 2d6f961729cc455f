//! # Volume Resolver
//!
//! Maps a bound PVC to the cloud volume behind it.
//!
//! The provisioner annotation decides which field of the PersistentVolume holds
//! the identifier and how that identifier is parsed:
//!
//! | Provisioner              | Source                                    | Identifier                |
//! |--------------------------|-------------------------------------------|---------------------------|
//! | `ebs.csi.aws.com`        | `csi.volumeHandle` or `awsElasticBlockStore` | `vol-...`              |
//! | `kubernetes.io/aws-ebs`  | `awsElasticBlockStore.volumeID`           | `vol-...`                 |
//! | `efs.csi.aws.com`        | `csi.volumeHandle` (`fs-x::fsap-y`)       | `fsap-...`                |
//! | `fsx.csi.aws.com`        | `csi.volumeHandle`                        | `fs-...` / `fsvol-...`    |
//! | `pd.csi.storage.gke.io`  | `csi.volumeHandle`                        | `projects/P/zones/Z/disks/D` |
//! | `kubernetes.io/gce-pd`   | `gcePersistentDisk.pdName`                | disk name                 |
//! | `disk.csi.azure.com`     | `csi.volumeHandle`                        | ARM resource ID           |

use crate::config::{Cloud, Config};
use crate::constants::{
    AWS_EBS_CSI_PROVISIONER, AWS_EBS_LEGACY_PROVISIONER, AWS_EFS_CSI_PROVISIONER,
    AWS_FSX_CSI_PROVISIONER, AZURE_DISK_CSI_PROVISIONER, GCP_PD_CSI_PROVISIONER,
    GCP_PD_LEGACY_PROVISIONER,
};
use crate::pvc;
use crate::tags::{build_tags, Tags};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::Api;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static AWS_EBS_VOLUME_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^vol-[^/]*$")
        .expect("Failed to compile EBS volume ID regex - this should never happen")
});

static AWS_EFS_VOLUME_HANDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^fs-\w+::(fsap-\w+)$")
        .expect("Failed to compile EFS volume handle regex - this should never happen")
});

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("PVC {0} is not bound to a PersistentVolume")]
    Unbound(String),
    #[error("PersistentVolume {0} not found")]
    NotFound(String),
    #[error("unknown or missing storage provisioner {0:?}")]
    UnknownProvisioner(Option<String>),
    #[error("PersistentVolume {volume} has no {source_kind} volume source")]
    MissingVolumeSource {
        volume: String,
        source_kind: &'static str,
    },
    #[error("cannot parse volume ID from {0:?}")]
    CannotParseVolumeId(String),
    #[error("invalid volume ID {id:?}: {reason}")]
    InvalidVolumeId { id: String, reason: &'static str },
    #[error("failed to get PersistentVolume: {0}")]
    Kube(#[from] kube::Error),
}

/// Storage provisioner behind a PVC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionerKind {
    AwsEbsCsi,
    AwsEbsLegacy,
    AwsEfsCsi,
    AwsFsxCsi,
    AzureDiskCsi,
    GcpPdCsi,
    GcpPdLegacy,
    Unknown,
}

impl ProvisionerKind {
    #[must_use]
    pub fn from_provisioner(name: &str) -> Self {
        match name {
            AWS_EBS_CSI_PROVISIONER => Self::AwsEbsCsi,
            AWS_EBS_LEGACY_PROVISIONER => Self::AwsEbsLegacy,
            AWS_EFS_CSI_PROVISIONER => Self::AwsEfsCsi,
            AWS_FSX_CSI_PROVISIONER => Self::AwsFsxCsi,
            AZURE_DISK_CSI_PROVISIONER => Self::AzureDiskCsi,
            GCP_PD_CSI_PROVISIONER => Self::GcpPdCsi,
            GCP_PD_LEGACY_PROVISIONER => Self::GcpPdLegacy,
            _ => Self::Unknown,
        }
    }

    /// Classify a PVC by its provisioner annotation
    #[must_use]
    pub fn classify(pvc: &PersistentVolumeClaim) -> Self {
        pvc::provisioner(pvc).map_or(Self::Unknown, Self::from_provisioner)
    }

    /// Cloud that owns volumes of this kind
    #[must_use]
    pub fn cloud(self) -> Option<Cloud> {
        match self {
            Self::AwsEbsCsi | Self::AwsEbsLegacy | Self::AwsEfsCsi | Self::AwsFsxCsi => {
                Some(Cloud::Aws)
            }
            Self::GcpPdCsi | Self::GcpPdLegacy => Some(Cloud::Gcp),
            Self::AzureDiskCsi => Some(Cloud::Azure),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwsEbsCsi => AWS_EBS_CSI_PROVISIONER,
            Self::AwsEbsLegacy => AWS_EBS_LEGACY_PROVISIONER,
            Self::AwsEfsCsi => AWS_EFS_CSI_PROVISIONER,
            Self::AwsFsxCsi => AWS_FSX_CSI_PROVISIONER,
            Self::AzureDiskCsi => AZURE_DISK_CSI_PROVISIONER,
            Self::GcpPdCsi => GCP_PD_CSI_PROVISIONER,
            Self::GcpPdLegacy => GCP_PD_LEGACY_PROVISIONER,
            Self::Unknown => "unknown",
        }
    }
}

/// Cloud volume identifier resolved from a PersistentVolume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRef {
    pub kind: ProvisionerKind,
    pub id: String,
}

impl VolumeRef {
    #[must_use]
    pub fn new(kind: ProvisionerKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Compute Engine disk named by a PD CSI volume handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpDiskId {
    pub project: String,
    /// `zones` or `regions`
    pub scope: String,
    pub location: String,
    pub name: String,
}

/// Azure managed disk named by an ARM resource ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureDiskId {
    pub subscription: String,
    pub resource_group: String,
    pub name: String,
}

/// EBS volume ID from a bare `vol-...` ID or the legacy `aws://<zone>/vol-...` form
///
/// Values without the `aws://` prefix are returned unchanged. Returns an empty
/// string when an `aws://` value cannot be parsed.
#[must_use]
pub fn parse_aws_ebs_volume_id(value: &str) -> String {
    let Some(rest) = value.strip_prefix("aws://") else {
        // Anything else is taken as a bare volume ID
        return value.to_string();
    };

    // aws://<zone>/<volume>; the zone is not needed
    let path = rest.split_once('/').map_or("", |(_zone, path)| path);
    let volume_id = path.trim_matches('/');
    if AWS_EBS_VOLUME_ID.is_match(volume_id) {
        volume_id.to_string()
    } else {
        String::new()
    }
}

/// EFS access point ID from an `fs-x::fsap-y` volume handle
///
/// Returns an empty string for handles without an access point.
#[must_use]
pub fn parse_aws_efs_volume_id(handle: &str) -> String {
    AWS_EFS_VOLUME_HANDLE
        .captures(handle)
        .and_then(|captures| captures.get(1))
        .map(|access_point| access_point.as_str().to_string())
        .unwrap_or_default()
}

/// Compute Engine disk from `projects/P/zones/Z/disks/D`
///
/// # Errors
/// Returns [`VolumeError::InvalidVolumeId`] for handles of any other shape
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn parse_gcp_volume_id(handle: &str) -> Result<GcpDiskId, VolumeError> {
    let invalid = |reason| VolumeError::InvalidVolumeId {
        id: handle.to_string(),
        reason,
    };
    let parts: Vec<&str> = handle.split('/').collect();
    if parts.len() < 6 {
        return Err(invalid("expected projects/<project>/zones/<zone>/disks/<disk>"));
    }
    if parts[2] != "zones" && parts[2] != "regions" {
        return Err(invalid("expected a zones or regions location"));
    }
    if parts[1].is_empty() || parts[3].is_empty() || parts[5].is_empty() {
        return Err(invalid("project, location and disk name must be non-empty"));
    }
    Ok(GcpDiskId {
        project: parts[1].to_string(),
        scope: parts[2].to_string(),
        location: parts[3].to_string(),
        name: parts[5].to_string(),
    })
}

/// Azure disk from `/subscriptions/S/resourceGroups/G/providers/Microsoft.Compute/disks/D`
///
/// # Errors
/// Returns [`VolumeError::InvalidVolumeId`] unless the ID splits into exactly nine fields
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn parse_azure_volume_id(handle: &str) -> Result<AzureDiskId, VolumeError> {
    let parts: Vec<&str> = handle.split('/').collect();
    if parts.len() != 9 {
        return Err(VolumeError::InvalidVolumeId {
            id: handle.to_string(),
            reason: "expected /subscriptions/<id>/resourceGroups/<group>/providers/Microsoft.Compute/disks/<disk>",
        });
    }
    Ok(AzureDiskId {
        subscription: parts[2].to_string(),
        resource_group: parts[4].to_string(),
        name: parts[8].to_string(),
    })
}

/// Read access to PersistentVolumes
#[async_trait]
pub trait PersistentVolumeLookup: Send + Sync {
    /// Fetch a PersistentVolume by name, `None` if it does not exist
    async fn get_persistent_volume(&self, name: &str)
        -> Result<Option<PersistentVolume>, kube::Error>;
}

#[async_trait]
impl PersistentVolumeLookup for Api<PersistentVolume> {
    async fn get_persistent_volume(
        &self,
        name: &str,
    ) -> Result<Option<PersistentVolume>, kube::Error> {
        self.get_opt(name).await
    }
}

/// Resolve the cloud volume behind `pvc` and compute its desired tags
///
/// # Errors
/// Fails when the claim is unbound, the PV is missing, the provisioner is not
/// recognized, or no identifier can be parsed from the PV
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub async fn process_persistent_volume_claim(
    pvc: &PersistentVolumeClaim,
    config: &Config,
    volumes: &dyn PersistentVolumeLookup,
) -> Result<(VolumeRef, Tags), VolumeError> {
    let key = pvc::object_key(pvc);
    let tags = build_tags(pvc, config);
    debug!(pvc = %key, tags = ?tags, "PVC tags");

    let volume_name =
        pvc::volume_name(pvc).ok_or_else(|| VolumeError::Unbound(key.clone()))?;
    let pv = volumes
        .get_persistent_volume(volume_name)
        .await?
        .ok_or_else(|| VolumeError::NotFound(volume_name.to_string()))?;

    let kind = ProvisionerKind::classify(pvc);
    if kind == ProvisionerKind::Unknown {
        return Err(VolumeError::UnknownProvisioner(
            pvc::provisioner(pvc).map(ToString::to_string),
        ));
    }

    let id = volume_id_from_pv(kind, &pv, volume_name)?;
    debug!(pvc = %key, volume_id = %id, "Parsed volume ID");
    if id.is_empty() {
        return Err(VolumeError::CannotParseVolumeId(volume_name.to_string()));
    }
    if kind == ProvisionerKind::AzureDiskCsi {
        parse_azure_volume_id(&id)?;
    }

    Ok((VolumeRef::new(kind, id), tags))
}

fn volume_id_from_pv(
    kind: ProvisionerKind,
    pv: &PersistentVolume,
    volume_name: &str,
) -> Result<String, VolumeError> {
    let spec = pv.spec.as_ref();
    let missing = |source_kind| VolumeError::MissingVolumeSource {
        volume: volume_name.to_string(),
        source_kind,
    };
    let csi_handle = || {
        spec.and_then(|s| s.csi.as_ref())
            .map(|csi| csi.volume_handle.clone())
            .ok_or_else(|| missing("csi"))
    };
    let ebs_volume_id = || {
        spec.and_then(|s| s.aws_elastic_block_store.as_ref())
            .map(|ebs| parse_aws_ebs_volume_id(&ebs.volume_id))
            .ok_or_else(|| missing("awsElasticBlockStore"))
    };

    match kind {
        ProvisionerKind::AwsEbsCsi => match spec.and_then(|s| s.csi.as_ref()) {
            Some(csi) => Ok(parse_aws_ebs_volume_id(&csi.volume_handle)),
            None => ebs_volume_id(),
        },
        ProvisionerKind::AwsEbsLegacy => ebs_volume_id(),
        ProvisionerKind::AwsEfsCsi => Ok(parse_aws_efs_volume_id(&csi_handle()?)),
        ProvisionerKind::AwsFsxCsi | ProvisionerKind::AzureDiskCsi | ProvisionerKind::GcpPdCsi => {
            csi_handle()
        }
        ProvisionerKind::GcpPdLegacy => spec
            .and_then(|s| s.gce_persistent_disk.as_ref())
            .map(|gce| gce.pd_name.clone())
            .ok_or_else(|| missing("gcePersistentDisk")),
        ProvisionerKind::Unknown => Err(VolumeError::UnknownProvisioner(None)),
    }
}
