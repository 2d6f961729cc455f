//! # PVC Accessors
//!
//! Small helpers over `PersistentVolumeClaim` that several modules need.

use crate::constants::{
    BETA_STORAGE_CLASS_ANNOTATION, BETA_STORAGE_PROVISIONER_ANNOTATION,
    STORAGE_PROVISIONER_ANNOTATION,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

/// `namespace/name` identity used for logging and the local watch store
#[must_use]
pub fn object_key(pvc: &PersistentVolumeClaim) -> String {
    format!(
        "{}/{}",
        pvc.metadata.namespace.as_deref().unwrap_or_default(),
        pvc.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Effective storage class name
///
/// The deprecated beta annotation wins over `spec.storageClassName`.
#[must_use]
pub fn storage_class_name(pvc: &PersistentVolumeClaim) -> String {
    if let Some(class) = pvc.annotations().get(BETA_STORAGE_CLASS_ANNOTATION) {
        return class.clone();
    }
    pvc.spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone())
        .unwrap_or_default()
}

/// Provisioner that created the bound volume, from the provisioner annotations
#[must_use]
pub fn provisioner(pvc: &PersistentVolumeClaim) -> Option<&str> {
    let annotations = pvc.annotations();
    annotations
        .get(STORAGE_PROVISIONER_ANNOTATION)
        .or_else(|| annotations.get(BETA_STORAGE_PROVISIONER_ANNOTATION))
        .map(String::as_str)
}

/// Name of the bound PersistentVolume, if the claim is bound
#[must_use]
pub fn volume_name(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .filter(|name| !name.is_empty())
}
