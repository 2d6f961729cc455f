//! # PVC Watch Loop
//!
//! Watches PersistentVolumeClaims and feeds Added / Updated events to the
//! [`Reconciler`].
//!
//! `kube_runtime::watcher` only reports the current object, so the loop keeps
//! the last seen version of every claim in a [`PvcStore`] to recover the
//! `(old, new)` pair for updates. A relist (`Init` .. `InitDone`) replays every
//! claim as an update against the cached copy and prunes claims that vanished
//! while the watch was down.

use crate::constants::DEFAULT_WATCH_RESTART_DELAY_SECS;
use crate::pvc::object_key;
use crate::reconciler::Reconciler;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Api, ResourceExt};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Event handed to the reconciler
#[derive(Debug, Clone)]
pub enum PvcEvent {
    Added(PersistentVolumeClaim),
    Updated {
        old: PersistentVolumeClaim,
        new: PersistentVolumeClaim,
    },
}

/// Last seen version of every watched claim, keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct PvcStore {
    objects: HashMap<String, PersistentVolumeClaim>,
    relisted: Option<HashSet<String>>,
}

impl PvcStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Fold a watcher event into the store, returning the event to reconcile
    pub fn handle(&mut self, event: Event<PersistentVolumeClaim>) -> Option<PvcEvent> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                None
            }
            Event::InitApply(pvc) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(object_key(&pvc));
                }
                Some(self.apply(pvc))
            }
            Event::InitDone => {
                if let Some(seen) = self.relisted.take() {
                    let before = self.objects.len();
                    self.objects.retain(|key, _| seen.contains(key));
                    let pruned = before - self.objects.len();
                    if pruned > 0 {
                        debug!(pruned = pruned, "Dropped PVCs deleted during relist");
                    }
                }
                None
            }
            Event::Apply(pvc) => Some(self.apply(pvc)),
            Event::Delete(pvc) => {
                self.objects.remove(&object_key(&pvc));
                None
            }
        }
    }

    fn apply(&mut self, pvc: PersistentVolumeClaim) -> PvcEvent {
        match self.objects.insert(object_key(&pvc), pvc.clone()) {
            Some(old) => PvcEvent::Updated { old, new: pvc },
            None => PvcEvent::Added(pvc),
        }
    }
}

/// Watch `api` until `shutdown` flips, reconciling every event
///
/// Events for one claim are handled one at a time. An event already being
/// reconciled when shutdown is requested runs to completion.
pub async fn run_watch_loop(
    api: Api<PersistentVolumeClaim>,
    namespace: String,
    reconciler: Reconciler,
    mut shutdown: watch::Receiver<bool>,
) {
    let scope = if namespace.is_empty() {
        "all namespaces".to_string()
    } else {
        namespace
    };
    let mut store = PvcStore::default();

    while !*shutdown.borrow() {
        info!(namespace = %scope, "Starting PVC watch");
        let stream =
            kube_runtime::watcher(api.clone(), watcher::Config::default()).default_backoff();
        pin_mut!(stream);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(namespace = %scope, "Stopping PVC watch");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if let Some(event) = store.handle(event) {
                            dispatch(&reconciler, event).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(namespace = %scope, error = %e, "Error watching PVCs");
                    }
                    None => break,
                }
            }
        }

        warn!(namespace = %scope, "PVC watch stream ended, restarting");
        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS)) => {}
        }
    }
}

async fn dispatch(reconciler: &Reconciler, event: PvcEvent) {
    let (pvc, result) = match &event {
        PvcEvent::Added(pvc) => (pvc, reconciler.on_add(pvc).await),
        PvcEvent::Updated { old, new } => (new, reconciler.on_update(old, new).await),
    };

    let namespace = pvc.namespace().unwrap_or_default();
    let name = pvc.name_any();
    match result {
        Ok(outcome) => {
            debug!(namespace = %namespace, pvc = %name, outcome = ?outcome, "Reconciled PVC");
        }
        Err(e) => {
            error!(namespace = %namespace, pvc = %name, error = %e, "Failed to reconcile PVC");
        }
    }
}
