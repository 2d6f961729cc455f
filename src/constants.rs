//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! command-line flags or environment variables where applicable.

/// Default annotation prefix for PVC annotations (`<prefix>/tags`, `<prefix>/ignore`)
pub const DEFAULT_ANNOTATION_PREFIX: &str = "k8s-pvc-tagger";

/// Annotation prefix used by the tool's previous name
///
/// Only honoured while the configured prefix is the default one.
pub const LEGACY_ANNOTATION_PREFIX: &str = "aws-ebs-tagger";

/// Annotation suffix holding the user supplied tags
pub const TAGS_ANNOTATION_SUFFIX: &str = "tags";

/// Annotation suffix that opts a PVC out of tagging
pub const IGNORE_ANNOTATION_SUFFIX: &str = "ignore";

/// Annotation naming the provisioner that created the volume
pub const STORAGE_PROVISIONER_ANNOTATION: &str = "volume.kubernetes.io/storage-provisioner";

/// Deprecated provisioner annotation, consulted when the current one is absent
pub const BETA_STORAGE_PROVISIONER_ANNOTATION: &str =
    "volume.beta.kubernetes.io/storage-provisioner";

/// Deprecated storage class annotation, overrides `spec.storageClassName` when present
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

// Provisioner names
pub const AWS_EBS_CSI_PROVISIONER: &str = "ebs.csi.aws.com";
pub const AWS_EBS_LEGACY_PROVISIONER: &str = "kubernetes.io/aws-ebs";
pub const AWS_EFS_CSI_PROVISIONER: &str = "efs.csi.aws.com";
pub const AWS_FSX_CSI_PROVISIONER: &str = "fsx.csi.aws.com";
pub const AZURE_DISK_CSI_PROVISIONER: &str = "disk.csi.azure.com";
pub const GCP_PD_CSI_PROVISIONER: &str = "pd.csi.storage.gke.io";
pub const GCP_PD_LEGACY_PROVISIONER: &str = "kubernetes.io/gce-pd";

/// Default port for the `/healthz` status server
pub const DEFAULT_STATUS_PORT: u16 = 8000;

/// Default port for the Prometheus `/metrics` server
pub const DEFAULT_METRICS_PORT: u16 = 8001;

/// Upper bound for a single cloud API call (seconds)
pub const DEFAULT_CLOUD_CALL_TIMEOUT_SECS: u64 = 30;

/// Maximum attempts for throttled or transient AWS errors
pub const AWS_MAX_RETRY_ATTEMPTS: u32 = 6;

/// Initial AWS retry backoff (seconds)
pub const AWS_INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum AWS retry backoff (seconds)
pub const AWS_MAX_BACKOFF_SECS: u64 = 10;

/// AWS tag keys are limited to 128 Unicode characters
pub const AWS_MAX_TAG_KEY_LENGTH: usize = 128;

/// AWS tag values are limited to 256 Unicode characters
pub const AWS_MAX_TAG_VALUE_LENGTH: usize = 256;

/// GCP label keys and values are limited to 63 characters
pub const GCP_MAX_LABEL_LENGTH: usize = 63;

/// Interval between GCP zone operation polls (seconds)
pub const GCP_OPERATION_POLL_INTERVAL_SECS: u64 = 1;

/// Maximum time to wait for a GCP zone operation (seconds)
pub const GCP_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Compute Engine REST endpoint
pub const GCP_COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// GCE metadata server token endpoint (Workload Identity)
pub const GCP_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Azure allows at most 50 tags per resource
pub const AZURE_MAX_TAGS: usize = 50;

/// Azure tag names are limited to 512 characters
pub const AZURE_MAX_TAG_KEY_LENGTH: usize = 512;

/// Azure tag values are limited to 256 characters
pub const AZURE_MAX_TAG_VALUE_LENGTH: usize = 256;

/// Characters Azure rejects in tag names
pub const AZURE_INVALID_TAG_KEY_CHARS: &[char] = &['<', '>', '%', '&', '\\', '?', '/'];

/// Azure Resource Manager endpoint
pub const AZURE_RESOURCE_MANAGER_URL: &str = "https://management.azure.com";

/// OAuth scope for Azure Resource Manager
pub const AZURE_RESOURCE_MANAGER_SCOPE: &str = "https://management.azure.com/.default";

/// `Microsoft.Compute/disks` API version
pub const AZURE_DISK_API_VERSION: &str = "2023-04-02";

/// Interval between Azure long-running operation polls (seconds)
pub const AZURE_OPERATION_POLL_INTERVAL_SECS: u64 = 5;

/// Maximum time to wait for an Azure long-running operation (seconds)
pub const AZURE_OPERATION_TIMEOUT_SECS: u64 = 120;

/// Delay before restarting a watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default name of the Lease that elects the active replica
pub const DEFAULT_LEASE_LOCK_NAME: &str = "k8s-pvc-tagger";

/// Namespace of the pod's service account, the Lease namespace fallback
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// How long a Lease stays valid without renewal (seconds)
pub const LEASE_DURATION_SECS: i32 = 60;

/// The leader gives up if it cannot renew within this long (seconds)
pub const LEASE_RENEW_DEADLINE_SECS: u64 = 15;

/// Interval between acquire and renew attempts (seconds)
pub const LEASE_RETRY_PERIOD_SECS: u64 = 5;
