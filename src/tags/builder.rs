//! # Tag Builder
//!
//! Computes the desired tag set for a PVC.
//!
//! Precedence, lowest to highest:
//! 1. `--default-tags`
//! 2. PVC labels selected by `--copy-labels`
//! 3. The `<prefix>/tags` annotation (or the legacy `aws-ebs-tagger/tags`)
//!
//! A PVC carrying `<prefix>/ignore` (or the legacy ignore annotation) gets an
//! empty tag set. Reserved names are dropped unless `--allow-all-tags` is set.
//! Values are rendered as templates last.

use super::template::render_tag_templates;
use super::validator::is_valid_tag_name;
use super::Tags;
use crate::config::{parse_tag_string, Config};
use crate::constants::{IGNORE_ANNOTATION_SUFFIX, TAGS_ANNOTATION_SUFFIX};
use crate::observability::metrics;
use crate::pvc::storage_class_name;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{debug, error, warn};

/// Build the desired tags for `pvc`
#[must_use]
pub fn build_tags(pvc: &PersistentVolumeClaim, config: &Config) -> Tags {
    let annotations = pvc.annotations();
    let storage_class = storage_class_name(pvc);

    let ignore = config.annotation(IGNORE_ANNOTATION_SUFFIX);
    let legacy_ignore = Config::legacy_annotation(IGNORE_ANNOTATION_SUFFIX);
    let ignored_by = if annotations.contains_key(&ignore) {
        Some(ignore)
    } else if config.uses_default_prefix() && annotations.contains_key(&legacy_ignore) {
        Some(legacy_ignore)
    } else {
        None
    };
    if let Some(annotation) = ignored_by {
        debug!(annotation = %annotation, "Ignore annotation is set");
        metrics::increment_pvc_ignored(&storage_class);
        return render_tag_templates(pvc, Tags::new());
    }

    let mut tags = Tags::new();
    insert_allowed(&mut tags, &config.default_tags, config, &storage_class);

    if !config.copy_labels.is_empty() {
        let copied: Tags = pvc
            .labels()
            .iter()
            .filter(|(key, _)| config.copies_label(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        insert_allowed(&mut tags, &copied, config, &storage_class);
    }

    if let Some(tag_string) = tags_annotation(pvc, config) {
        match parse_tag_string(tag_string, config.tag_format) {
            Ok(custom) => insert_allowed(&mut tags, &custom, config, &storage_class),
            Err(e) => error!(
                error = %e,
                tag_format = ?config.tag_format,
                "Failed to parse tags annotation"
            ),
        }
    }

    render_tag_templates(pvc, tags)
}

/// The raw tags annotation, preferring the configured prefix over the legacy one
fn tags_annotation<'a>(pvc: &'a PersistentVolumeClaim, config: &Config) -> Option<&'a str> {
    let annotations = pvc.annotations();
    let current = annotations.get(&config.annotation(TAGS_ANNOTATION_SUFFIX));
    let legacy = if config.uses_default_prefix() {
        annotations.get(&Config::legacy_annotation(TAGS_ANNOTATION_SUFFIX))
    } else {
        None
    };

    match (current, legacy) {
        (None, None) => {
            debug!(
                prefix = %config.annotation_prefix,
                "PVC has no tags annotation"
            );
            None
        }
        (Some(current), Some(_)) => {
            warn!(
                prefix = %config.annotation_prefix,
                "PVC has both the tags annotation and the legacy one, using the newer annotation"
            );
            Some(current.as_str())
        }
        (Some(current), None) => Some(current.as_str()),
        (None, Some(legacy)) => Some(legacy.as_str()),
    }
}

fn insert_allowed(tags: &mut Tags, candidates: &Tags, config: &Config, storage_class: &str) {
    for (key, value) in candidates {
        if !is_valid_tag_name(key) {
            if !config.allow_all_tags {
                warn!(tag = %key, "Restricted tag, skipping");
                metrics::increment_invalid_tags(storage_class);
                continue;
            }
            warn!(tag = %key, "Restricted tag but still allowing it to be set");
        }
        tags.insert(key.clone(), value.clone());
    }
}
