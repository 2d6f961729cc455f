//! # Reconciler Tests
//!
//! Add and update handling against recording taggers.
//!
//! These tests verify:
//! - Added PVCs are tagged once resolved, untouched when there is nothing to do
//! - Updates are skipped for resyncs, unbound and terminating claims
//! - Keys dropped between old and new objects are sent for removal
//! - Claims from other clouds' provisioners are left alone
//! - Cloud failures surface as `ReconcileError::Provider`

mod common;

use common::{csi_pv, tags, FakeVolumes, PvcBuilder, RecordingTagger, TagCall};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_pvc_tagger::provider::{TaggingBackend, VolumeTagger};
use k8s_pvc_tagger::{Config, ReconcileError, ReconcileOutcome, Reconciler, SkipReason};
use std::sync::Arc;

struct Harness {
    reconciler: Reconciler,
    ebs: Arc<RecordingTagger>,
    efs: Arc<RecordingTagger>,
}

fn aws_harness(config: Config, ebs: RecordingTagger) -> Harness {
    let ebs = Arc::new(ebs);
    let efs = Arc::new(RecordingTagger::new("aws-efs"));
    let backend = TaggingBackend::Aws {
        ebs: Arc::clone(&ebs) as Arc<dyn VolumeTagger>,
        efs: Arc::clone(&efs) as Arc<dyn VolumeTagger>,
        fsx: Arc::new(RecordingTagger::new("aws-fsx")),
    };
    let volumes = FakeVolumes::default()
        .with(csi_pv("pv-ebs", "ebs.csi.aws.com", "vol-0123"))
        .with(csi_pv("pv-efs", "efs.csi.aws.com", "fs-1::fsap-2"))
        .with(csi_pv("pv-pd", "pd.csi.storage.gke.io", "projects/p/zones/z/disks/d"));

    Harness {
        reconciler: Reconciler::new(Arc::new(config), Arc::new(volumes), backend),
        ebs,
        efs,
    }
}

fn ebs_claim(version: &str, tags_annotation: &str) -> PersistentVolumeClaim {
    PvcBuilder::new("data")
        .resource_version(version)
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", tags_annotation)
        .bound_to("pv-ebs")
        .build()
}

#[tokio::test]
async fn test_add_tags_volume() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));

    let outcome = harness
        .reconciler
        .on_add(&ebs_claim("1", r#"{"team":"storage"}"#))
        .await
        .expect("add succeeds");

    assert_eq!(outcome, ReconcileOutcome::Tagged);
    assert_eq!(
        harness.ebs.calls(),
        vec![TagCall {
            volume_id: "vol-0123".to_string(),
            tags: tags(&[("team", "storage")]),
            removed: vec![],
        }]
    );
    assert!(harness.efs.calls().is_empty());
}

#[tokio::test]
async fn test_add_routes_efs_claims() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));
    let pvc = PvcBuilder::new("shared")
        .provisioner("efs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"storage"}"#)
        .bound_to("pv-efs")
        .build();

    harness.reconciler.on_add(&pvc).await.expect("add succeeds");

    assert!(harness.ebs.calls().is_empty());
    assert_eq!(harness.efs.calls()[0].volume_id, "fsap-2");
}

#[tokio::test]
async fn test_add_skips() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));

    let unbound = PvcBuilder::new("data")
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"storage"}"#)
        .build();
    let no_tags = PvcBuilder::new("data")
        .provisioner("ebs.csi.aws.com")
        .bound_to("pv-ebs")
        .build();
    let other_cloud = PvcBuilder::new("data")
        .provisioner("pd.csi.storage.gke.io")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"storage"}"#)
        .bound_to("pv-pd")
        .build();

    let cases = vec![
        (unbound, SkipReason::Unbound),
        (no_tags, SkipReason::NoTags),
        (other_cloud, SkipReason::NotManaged),
    ];
    for (pvc, reason) in cases {
        let outcome = harness.reconciler.on_add(&pvc).await.expect("add succeeds");
        assert_eq!(outcome, ReconcileOutcome::Skipped(reason));
    }
    assert!(harness.ebs.calls().is_empty());
}

#[tokio::test]
async fn test_update_removes_dropped_keys() {
    let config = Config {
        default_tags: tags(&[("env", "prod")]),
        ..Config::default()
    };
    let harness = aws_harness(config, RecordingTagger::new("aws-ebs"));
    let old = ebs_claim("1", r#"{"team":"storage","cost-center":"42"}"#);
    let new = ebs_claim("2", r#"{"team":"platform"}"#);

    let outcome = harness
        .reconciler
        .on_update(&old, &new)
        .await
        .expect("update succeeds");

    assert_eq!(outcome, ReconcileOutcome::Tagged);
    assert_eq!(
        harness.ebs.calls(),
        vec![TagCall {
            volume_id: "vol-0123".to_string(),
            tags: tags(&[("env", "prod"), ("team", "platform")]),
            removed: vec!["cost-center".to_string()],
        }]
    );
}

#[tokio::test]
async fn test_update_only_removals() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));
    let old = ebs_claim("1", r#"{"team":"storage"}"#);
    let new = PvcBuilder::new("data")
        .resource_version("2")
        .provisioner("ebs.csi.aws.com")
        .bound_to("pv-ebs")
        .build();

    harness
        .reconciler
        .on_update(&old, &new)
        .await
        .expect("update succeeds");

    let calls = harness.ebs.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].tags.is_empty());
    assert_eq!(calls[0].removed, vec!["team".to_string()]);
}

#[tokio::test]
async fn test_update_skips() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));
    let old = ebs_claim("1", r#"{"team":"storage"}"#);

    let resync = ebs_claim("1", r#"{"team":"platform"}"#);
    let unbound = PvcBuilder::new("data")
        .resource_version("2")
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"platform"}"#)
        .build();
    let terminating = PvcBuilder::new("data")
        .resource_version("3")
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"platform"}"#)
        .bound_to("pv-ebs")
        .terminating()
        .build();

    let cases = vec![
        (resync, SkipReason::SameResourceVersion),
        (unbound, SkipReason::Unbound),
        (terminating, SkipReason::Terminating),
    ];
    for (new, reason) in cases {
        let outcome = harness
            .reconciler
            .on_update(&old, &new)
            .await
            .expect("update succeeds");
        assert_eq!(outcome, ReconcileOutcome::Skipped(reason));
    }
    assert!(harness.ebs.calls().is_empty());
}

#[tokio::test]
async fn test_unchanged_volume() {
    let harness = aws_harness(Config::default(), RecordingTagger::unchanged("aws-ebs"));

    let outcome = harness
        .reconciler
        .on_add(&ebs_claim("1", r#"{"team":"storage"}"#))
        .await
        .expect("add succeeds");

    assert_eq!(outcome, ReconcileOutcome::Unchanged);
}

#[tokio::test]
async fn test_provider_failure_is_reported() {
    let harness = aws_harness(Config::default(), RecordingTagger::failing("aws-ebs"));

    let result = harness
        .reconciler
        .on_add(&ebs_claim("1", r#"{"team":"storage"}"#))
        .await;

    match result {
        Err(ReconcileError::Provider {
            provider, volume, ..
        }) => {
            assert_eq!(provider, "aws-ebs");
            assert_eq!(volume, "vol-0123");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_volume_is_reported() {
    let harness = aws_harness(Config::default(), RecordingTagger::new("aws-ebs"));
    let pvc = PvcBuilder::new("data")
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"team":"storage"}"#)
        .bound_to("pv-missing")
        .build();

    let result = harness.reconciler.on_add(&pvc).await;

    assert!(matches!(result, Err(ReconcileError::Volume(_))));
    assert!(harness.ebs.calls().is_empty());
}
