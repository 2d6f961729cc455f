//! # Tag Builder and Volume Resolution Tests
//!
//! Drives `build_tags` and `process_persistent_volume_claim` through the
//! public API with in-memory PersistentVolumes.
//!
//! These tests verify:
//! - Default tags, copied labels and annotation tags merge in order
//! - Ignore annotations (current and legacy) suppress tagging
//! - Template values render from the PVC's metadata
//! - Volume IDs resolve for every supported provisioner

mod common;

use common::{csi_pv, ebs_pv, gce_pv, tags, FakeVolumes, PvcBuilder};
use k8s_pvc_tagger::config::{parse_copy_labels, parse_csv};
use k8s_pvc_tagger::tags::build_tags;
use k8s_pvc_tagger::volume::{process_persistent_volume_claim, VolumeError};
use k8s_pvc_tagger::{Config, ProvisionerKind, TagFormat};

fn config_with_defaults(defaults: &[(&str, &str)]) -> Config {
    Config {
        default_tags: tags(defaults),
        ..Config::default()
    }
}

#[test]
fn test_annotation_overrides_default_tags() {
    let config = config_with_defaults(&[("foo", "foo")]);
    let pvc = PvcBuilder::new("data")
        .annotation("k8s-pvc-tagger/tags", r#"{"foo":"bar","something":"else"}"#)
        .build();

    assert_eq!(
        build_tags(&pvc, &config),
        tags(&[("foo", "bar"), ("something", "else")])
    );
}

#[test]
fn test_ignore_annotation_wins_over_everything() {
    let config = config_with_defaults(&[("foo", "foo")]);
    let cases = vec!["k8s-pvc-tagger/ignore", "aws-ebs-tagger/ignore"];

    for annotation in cases {
        let pvc = PvcBuilder::new("data")
            .annotation(annotation, "")
            .annotation("k8s-pvc-tagger/tags", r#"{"foo":"bar"}"#)
            .build();
        assert!(
            build_tags(&pvc, &config).is_empty(),
            "{annotation} should suppress tags"
        );
    }
}

#[test]
fn test_copy_labels() {
    let config = Config {
        copy_labels: parse_copy_labels("TeamID"),
        ..Config::default()
    };
    let pvc = PvcBuilder::new("data")
        .label("TeamID", "Frontend")
        .label("Other", "skipped")
        .build();

    assert_eq!(build_tags(&pvc, &config), tags(&[("TeamID", "Frontend")]));
}

#[test]
fn test_templates_render_from_metadata() {
    let config = Config::default();
    let pvc = PvcBuilder::new("my-pvc")
        .namespace("my-namespace")
        .label("team", "storage")
        .annotation(
            "k8s-pvc-tagger/tags",
            r#"{"foo":"{{ .Name }}-{{ .Namespace }}","team":"{{ .Labels.team }}","broken":"{{ .Blah }}"}"#,
        )
        .build();

    assert_eq!(
        build_tags(&pvc, &config),
        tags(&[
            ("broken", "{{ .Blah }}"),
            ("foo", "my-pvc-my-namespace"),
            ("team", "storage"),
        ])
    );
}

#[test]
fn test_default_tags_and_copied_labels_are_templated() {
    let config = Config {
        default_tags: tags(&[("owner", "{{ .Namespace }}"), ("broken", "{{ .Blah }}")]),
        copy_labels: parse_copy_labels("team"),
        ..Config::default()
    };
    let pvc = PvcBuilder::new("my-pvc")
        .namespace("my-namespace")
        .label("team", "{{ .Name }}-x")
        .build();

    assert_eq!(
        build_tags(&pvc, &config),
        tags(&[
            ("broken", "{{ .Blah }}"),
            ("owner", "my-namespace"),
            ("team", "my-pvc-x"),
        ])
    );
}

#[test]
fn test_copied_labels_are_filtered_like_default_tags() {
    let config = Config {
        default_tags: tags(&[("Name", "reserved"), ("env", "prod")]),
        copy_labels: parse_copy_labels("*"),
        ..Config::default()
    };
    let pvc = PvcBuilder::new("data")
        .label("kubernetes.io/managed", "yes")
        .label("KubernetesCluster", "prod")
        .label("team", "storage")
        .build();

    assert_eq!(
        build_tags(&pvc, &config),
        tags(&[("env", "prod"), ("team", "storage")])
    );
}

#[test]
fn test_csv_format() {
    let config = Config {
        default_tags: parse_csv("env=prod,,owner=ops"),
        tag_format: TagFormat::Csv,
        ..Config::default()
    };
    let pvc = PvcBuilder::new("data")
        .annotation("k8s-pvc-tagger/tags", "owner=storage,invalid")
        .build();

    assert_eq!(
        build_tags(&pvc, &config),
        tags(&[("env", "prod"), ("owner", "storage")])
    );
}

#[tokio::test]
async fn test_process_ebs_csi_claim() {
    let config = Config::default();
    let volumes = FakeVolumes::default().with(csi_pv("pv-1", "ebs.csi.aws.com", "vol-12345"));
    let pvc = PvcBuilder::new("data")
        .provisioner("ebs.csi.aws.com")
        .annotation("k8s-pvc-tagger/tags", r#"{"foo":"bar"}"#)
        .bound_to("pv-1")
        .build();

    let (volume, tags_out) = process_persistent_volume_claim(&pvc, &config, &volumes)
        .await
        .expect("claim resolves");

    assert_eq!(volume.kind, ProvisionerKind::AwsEbsCsi);
    assert_eq!(volume.id, "vol-12345");
    assert_eq!(tags_out, tags(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_process_resolves_every_provisioner() {
    let config = Config::default();
    let azure_id = "/subscriptions/s/resourceGroups/g/providers/Microsoft.Compute/disks/d";
    let cases = vec![
        (
            "kubernetes.io/aws-ebs",
            ebs_pv("pv", "aws://us-east-1a/vol-0abc"),
            ProvisionerKind::AwsEbsLegacy,
            "vol-0abc",
        ),
        (
            "efs.csi.aws.com",
            csi_pv("pv", "efs.csi.aws.com", "fs-1234::fsap-5678"),
            ProvisionerKind::AwsEfsCsi,
            "fsap-5678",
        ),
        (
            "fsx.csi.aws.com",
            csi_pv("pv", "fsx.csi.aws.com", "fs-0a1b2c"),
            ProvisionerKind::AwsFsxCsi,
            "fs-0a1b2c",
        ),
        (
            "pd.csi.storage.gke.io",
            csi_pv("pv", "pd.csi.storage.gke.io", "projects/p/zones/z/disks/d"),
            ProvisionerKind::GcpPdCsi,
            "projects/p/zones/z/disks/d",
        ),
        (
            "kubernetes.io/gce-pd",
            gce_pv("pv", "pvc-disk-1"),
            ProvisionerKind::GcpPdLegacy,
            "pvc-disk-1",
        ),
        (
            "disk.csi.azure.com",
            csi_pv("pv", "disk.csi.azure.com", azure_id),
            ProvisionerKind::AzureDiskCsi,
            azure_id,
        ),
    ];

    for (provisioner, pv, kind, id) in cases {
        let volumes = FakeVolumes::default().with(pv);
        let pvc = PvcBuilder::new("data")
            .provisioner(provisioner)
            .bound_to("pv")
            .build();

        let (volume, _) = process_persistent_volume_claim(&pvc, &config, &volumes)
            .await
            .unwrap_or_else(|e| panic!("{provisioner} should resolve: {e}"));
        assert_eq!(volume.kind, kind, "{provisioner}");
        assert_eq!(volume.id, id, "{provisioner}");
    }
}

#[tokio::test]
async fn test_process_failures() {
    let config = Config::default();

    let unknown = PvcBuilder::new("data")
        .provisioner("example.com/nfs")
        .bound_to("pv")
        .build();
    let volumes = FakeVolumes::default().with(csi_pv("pv", "example.com/nfs", "share-1"));
    let result = process_persistent_volume_claim(&unknown, &config, &volumes).await;
    assert!(matches!(result, Err(VolumeError::UnknownProvisioner(Some(ref p))) if p == "example.com/nfs"));

    let missing = PvcBuilder::new("data")
        .provisioner("ebs.csi.aws.com")
        .bound_to("gone")
        .build();
    let result = process_persistent_volume_claim(&missing, &config, &FakeVolumes::default()).await;
    assert!(matches!(result, Err(VolumeError::NotFound(ref name)) if name == "gone"));

    let legacy_gcp_on_csi = PvcBuilder::new("data")
        .provisioner("kubernetes.io/gce-pd")
        .bound_to("pv")
        .build();
    let volumes = FakeVolumes::default().with(csi_pv(
        "pv",
        "pd.csi.storage.gke.io",
        "projects/p/zones/z/disks/d",
    ));
    let result = process_persistent_volume_claim(&legacy_gcp_on_csi, &config, &volumes).await;
    assert!(matches!(
        result,
        Err(VolumeError::MissingVolumeSource { ref volume, source_kind: "gcePersistentDisk" })
            if volume == "pv"
    ));

    let bad_efs = PvcBuilder::new("data")
        .provisioner("efs.csi.aws.com")
        .bound_to("pv")
        .build();
    let volumes = FakeVolumes::default().with(csi_pv("pv", "efs.csi.aws.com", "fs-1234"));
    let result = process_persistent_volume_claim(&bad_efs, &config, &volumes).await;
    assert!(matches!(result, Err(VolumeError::CannotParseVolumeId(_))));

    let bad_azure = PvcBuilder::new("data")
        .provisioner("disk.csi.azure.com")
        .bound_to("pv")
        .build();
    let volumes = FakeVolumes::default().with(csi_pv("pv", "disk.csi.azure.com", "/subscriptions/s"));
    let result = process_persistent_volume_claim(&bad_azure, &config, &volumes).await;
    assert!(matches!(result, Err(VolumeError::InvalidVolumeId { .. })));
}
