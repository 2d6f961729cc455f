//! # Reconciler
//!
//! Turns PVC events into tag updates on the backing cloud volume.
//!
//! - **Added**: resolve the volume and apply the desired tags as-is.
//! - **Updated(old, new)**: skip no-op updates, unbound claims and claims
//!   being deleted. Otherwise apply the new tags and remove every key the old
//!   object produced that the new one no longer does.
//!
//! All errors stop at this boundary: the caller logs them and the next event
//! for the same PVC corrects any partial state.

use crate::config::Config;
use crate::observability::metrics::{self, ActionStatus};
use crate::provider::{ProviderError, TagUpdate, TaggingBackend, VolumeTagger};
use crate::pvc;
use crate::tags::{build_tags, Tags};
use crate::volume::{
    process_persistent_volume_claim, PersistentVolumeLookup, ProvisionerKind, VolumeError,
    VolumeRef,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error("failed to update tags on {provider} volume {volume}: {source}")]
    Provider {
        provider: &'static str,
        volume: String,
        #[source]
        source: ProviderError,
    },
}

/// Why an event did not lead to a cloud call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Resync of an object that did not change
    SameResourceVersion,
    /// No PersistentVolume bound yet
    Unbound,
    /// Deletion timestamp set
    Terminating,
    /// Provisioner not handled by the active cloud
    NotManaged,
    /// Nothing to add and nothing to remove
    NoTags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// The live tags already matched
    Unchanged,
    Tagged,
}

/// Keys produced for the old object that the new one no longer produces
#[must_use]
pub fn deleted_tags(old: &Tags, new: &Tags) -> Vec<String> {
    old.keys().filter(|key| !new.contains_key(*key)).cloned().collect()
}

/// Reconciles PVC events against one cloud backend
#[derive(Clone)]
pub struct Reconciler {
    config: Arc<Config>,
    volumes: Arc<dyn PersistentVolumeLookup>,
    backend: TaggingBackend,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        volumes: Arc<dyn PersistentVolumeLookup>,
        backend: TaggingBackend,
    ) -> Self {
        Self {
            config,
            volumes,
            backend,
        }
    }

    /// Handle a PVC seen for the first time
    ///
    /// # Errors
    /// Returns [`ReconcileError`] if the volume cannot be resolved or the cloud update fails
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn on_add(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = pvc::object_key(pvc);
        let span = info_span!("reconcile.add", pvc = %key);

        async move {
            info!("New PVC added to store");
            if pvc::volume_name(pvc).is_none() {
                debug!("PersistentVolume not created yet");
                return Ok(ReconcileOutcome::Skipped(SkipReason::Unbound));
            }
            let Some(tagger) = self.tagger(pvc) else {
                return Ok(ReconcileOutcome::Skipped(SkipReason::NotManaged));
            };

            let (volume, tags) =
                process_persistent_volume_claim(pvc, &self.config, self.volumes.as_ref()).await?;
            if tags.is_empty() {
                debug!("No tags to apply");
                return Ok(ReconcileOutcome::Skipped(SkipReason::NoTags));
            }

            self.apply(tagger, pvc, &volume, &tags, &[]).await
        }
        .instrument(span)
        .await
    }

    /// Handle a change between two observed versions of a PVC
    ///
    /// # Errors
    /// Returns [`ReconcileError`] if the volume cannot be resolved or the cloud update fails
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn on_update(
        &self,
        old: &PersistentVolumeClaim,
        new: &PersistentVolumeClaim,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = pvc::object_key(new);
        let span = info_span!("reconcile.update", pvc = %key);

        async move {
            if old.metadata.resource_version == new.metadata.resource_version {
                debug!("ResourceVersion is the same");
                return Ok(ReconcileOutcome::Skipped(SkipReason::SameResourceVersion));
            }
            if pvc::volume_name(new).is_none() {
                debug!("PersistentVolume not created yet");
                return Ok(ReconcileOutcome::Skipped(SkipReason::Unbound));
            }
            if new.metadata.deletion_timestamp.is_some() {
                debug!("PersistentVolumeClaim is being deleted");
                return Ok(ReconcileOutcome::Skipped(SkipReason::Terminating));
            }
            let Some(tagger) = self.tagger(new) else {
                return Ok(ReconcileOutcome::Skipped(SkipReason::NotManaged));
            };
            info!("Need to reconcile tags");

            let (volume, tags) =
                process_persistent_volume_claim(new, &self.config, self.volumes.as_ref()).await?;
            let old_tags = build_tags(old, &self.config);
            let deleted = deleted_tags(&old_tags, &tags);
            if tags.is_empty() && deleted.is_empty() {
                debug!("No tags to apply or remove");
                return Ok(ReconcileOutcome::Skipped(SkipReason::NoTags));
            }

            self.apply(tagger, new, &volume, &tags, &deleted).await
        }
        .instrument(span)
        .await
    }

    fn tagger(&self, pvc: &PersistentVolumeClaim) -> Option<&Arc<dyn VolumeTagger>> {
        let kind = ProvisionerKind::classify(pvc);
        let tagger = self.backend.tagger_for(kind);
        if tagger.is_none() {
            debug!(
                provisioner = pvc::provisioner(pvc).unwrap_or_default(),
                volume_cloud = ?kind.cloud(),
                cloud = %self.backend.cloud(),
                "Volume not provisioned by a supported provisioner"
            );
        }
        tagger
    }

    async fn apply(
        &self,
        tagger: &Arc<dyn VolumeTagger>,
        pvc: &PersistentVolumeClaim,
        volume: &VolumeRef,
        tags: &Tags,
        removed: &[String],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let storage_class = pvc::storage_class_name(pvc);

        match tagger.update_tags(volume, tags, removed).await {
            Ok(TagUpdate::Applied) => {
                info!(
                    volume_id = %volume.id,
                    storageclass = %storage_class,
                    added = tags.len(),
                    removed = removed.len(),
                    "Updated volume tags"
                );
                metrics::record_action(ActionStatus::Success, &storage_class);
                Ok(ReconcileOutcome::Tagged)
            }
            Ok(TagUpdate::Unchanged) => {
                debug!(volume_id = %volume.id, "Volume tags already up to date");
                Ok(ReconcileOutcome::Unchanged)
            }
            Err(source) => {
                metrics::record_action(ActionStatus::Error, &storage_class);
                Err(ReconcileError::Provider {
                    provider: tagger.provider(),
                    volume: volume.id.clone(),
                    source,
                })
            }
        }
    }
}
