//! Reserved tag names.

/// Whether `name` may be set as a tag
///
/// Names starting with `kubernetes.io` and the names `Name` and
/// `KubernetesCluster` are owned by Kubernetes and the cloud integrations.
/// The comparison ignores case.
#[must_use]
pub fn is_valid_tag_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    !(lower.starts_with("kubernetes.io") || lower == "name" || lower == "kubernetescluster")
}
