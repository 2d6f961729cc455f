//! k8s-pvc-tagger library
//!
//! Watches PersistentVolumeClaims and keeps tags on the backing cloud volumes
//! (AWS EBS/EFS/FSx, GCP Persistent Disk, Azure Disk) in line with defaults,
//! PVC annotations and copied labels.
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod logging;
pub mod observability;
pub mod provider;
pub mod pvc;
pub mod reconciler;
pub mod runtime;
pub mod sanitize;
pub mod server;
pub mod tags;
pub mod volume;

pub use config::{Cloud, Config, TagFormat};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler, SkipReason};
pub use tags::Tags;
pub use volume::{ProvisionerKind, VolumeRef};
