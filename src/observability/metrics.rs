//! # Metrics
//!
//! Prometheus metrics for monitoring the tagger.
//!
//! ## Metrics Exposed
//!
//! - `k8s_pvc_tagger_actions_total{status,storageclass}` - Tag writes by outcome
//! - `k8s_pvc_tagger_pvc_ignored_total{storageclass}` - PVCs skipped by the ignore annotation
//! - `k8s_pvc_tagger_invalid_tags_total{storageclass}` - Reserved tag names dropped
//! - `k8s_pvc_tagger_cloud_api_duration_seconds{provider}` - Duration of tag updates per cloud
//! - `k8s_aws_ebs_tagger_actions_total{status}` - Legacy name of the actions counter
//! - `k8s_aws_ebs_tagger_pvc_ignored_total` - Legacy name of the ignored counter
//! - `k8s_aws_ebs_tagger_invalid_tags_total` - Legacy name of the invalid tags counter

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("k8s_pvc_tagger_actions_total", "The total number of PVCs tagged"),
        &["status", "storageclass"],
    )
    .expect("Failed to create ACTIONS_TOTAL metric - this should never happen")
});

static PVC_IGNORED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "k8s_pvc_tagger_pvc_ignored_total",
            "The total number of PVCs ignored",
        ),
        &["storageclass"],
    )
    .expect("Failed to create PVC_IGNORED_TOTAL metric - this should never happen")
});

static INVALID_TAGS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "k8s_pvc_tagger_invalid_tags_total",
            "The total number of invalid tags found",
        ),
        &["storageclass"],
    )
    .expect("Failed to create INVALID_TAGS_TOTAL metric - this should never happen")
});

static CLOUD_API_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "k8s_pvc_tagger_cloud_api_duration_seconds",
            "Duration of volume tag updates in seconds by provider",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["provider"],
    )
    .expect("Failed to create CLOUD_API_DURATION metric - this should never happen")
});

static LEGACY_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "k8s_aws_ebs_tagger_actions_total",
            "The total number of PVCs tagged",
        ),
        &["status"],
    )
    .expect("Failed to create LEGACY_ACTIONS_TOTAL metric - this should never happen")
});

static LEGACY_PVC_IGNORED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "k8s_aws_ebs_tagger_pvc_ignored_total",
        "The total number of PVCs ignored",
    )
    .expect("Failed to create LEGACY_PVC_IGNORED_TOTAL metric - this should never happen")
});

static LEGACY_INVALID_TAGS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "k8s_aws_ebs_tagger_invalid_tags_total",
        "The total number of invalid tags found",
    )
    .expect("Failed to create LEGACY_INVALID_TAGS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PVC_IGNORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_TAGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CLOUD_API_DURATION.clone()))?;
    REGISTRY.register(Box::new(LEGACY_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEGACY_PVC_IGNORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEGACY_INVALID_TAGS_TOTAL.clone()))?;

    Ok(())
}

/// Outcome label for the actions counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Error,
}

impl ActionStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

pub fn record_action(status: ActionStatus, storage_class: &str) {
    ACTIONS_TOTAL
        .with_label_values(&[status.as_str(), storage_class])
        .inc();
    LEGACY_ACTIONS_TOTAL
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn increment_pvc_ignored(storage_class: &str) {
    PVC_IGNORED_TOTAL.with_label_values(&[storage_class]).inc();
    LEGACY_PVC_IGNORED_TOTAL.inc();
}

pub fn increment_invalid_tags(storage_class: &str) {
    INVALID_TAGS_TOTAL.with_label_values(&[storage_class]).inc();
    LEGACY_INVALID_TAGS_TOTAL.inc();
}

pub fn observe_cloud_api_duration(provider: &str, duration: f64) {
    CLOUD_API_DURATION
        .with_label_values(&[provider])
        .observe(duration);
}

/// Encode every registered metric in the Prometheus text format
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn gather_text() -> Result<Vec<u8>> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}
