//! # Leader Election
//!
//! A `coordination.k8s.io/v1` Lease makes sure only one replica tags volumes.
//!
//! - The lease is taken when it does not exist, has no holder, or its holder
//!   has not renewed it within the lease duration.
//! - The holder renews it every retry period.
//! - If renewals keep failing for longer than the renew deadline, or another
//!   replica is seen holding the lease, leadership is treated as lost.
//! - On shutdown the holder releases the lease so a standby takes over
//!   without waiting for it to expire.
//!
//! Writes use `replace` with the observed `resourceVersion`, so two replicas
//! racing for the same lease cannot both win.

use crate::config::LeaseSettings;
use crate::constants::{LEASE_DURATION_SECS, LEASE_RENEW_DEADLINE_SECS, LEASE_RETRY_PERIOD_SECS};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, PostParams};
use kube::Api;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Holder and timing fields read from a Lease
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseRecord {
    pub holder: Option<String>,
    pub renew_time: Option<DateTime<Utc>>,
    pub lease_duration_secs: i32,
    pub transitions: i32,
}

impl LeaseRecord {
    #[must_use]
    pub fn from_lease(lease: &Lease) -> Self {
        let Some(spec) = lease.spec.as_ref() else {
            return Self::default();
        };
        Self {
            holder: spec.holder_identity.clone(),
            renew_time: spec.renew_time.as_ref().and_then(from_micro_time),
            lease_duration_secs: spec.lease_duration_seconds.unwrap_or_default(),
            transitions: spec.lease_transitions.unwrap_or_default(),
        }
    }

    /// Whether the holder stopped renewing more than one lease duration ago
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.renew_time {
            Some(renewed) => {
                renewed + chrono::Duration::seconds(i64::from(self.lease_duration_secs)) < now
            }
            None => true,
        }
    }
}

/// What to do with the Lease on the next attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No Lease exists yet
    Create,
    /// This replica holds the lease
    Renew,
    /// The lease is free or its holder stopped renewing it
    TakeOver,
    /// Another replica holds a live lease
    Wait { holder: String },
}

/// Decide how `identity` should treat the current lease state at `now`
#[must_use]
pub fn decide(record: Option<&LeaseRecord>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(record) = record else {
        return LeaseDecision::Create;
    };
    match record.holder.as_deref() {
        None | Some("") => LeaseDecision::TakeOver,
        Some(holder) if holder == identity => LeaseDecision::Renew,
        Some(_) if record.is_expired(now) => LeaseDecision::TakeOver,
        Some(holder) => LeaseDecision::Wait {
            holder: holder.to_string(),
        },
    }
}

/// Whether a leader whose last successful renewal was `since_renewal` ago has lost the lease
#[must_use]
pub fn renewal_expired(since_renewal: Duration, renew_deadline: Duration) -> bool {
    since_renewal > renew_deadline
}

/// Result of one acquire or renew attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAttempt {
    /// This replica holds the lease afterwards
    Held,
    /// Another replica holds a live lease
    HeldBy(String),
    /// The write raced with another replica; the next attempt re-reads the lease
    Conflict,
}

/// How a leadership term ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEnd {
    /// Shutdown was requested while leading
    Shutdown,
    /// Renewals failed for longer than the renew deadline, or another
    /// replica took the lease over
    Lost,
}

// MicroTime goes through its RFC 3339 wire form
fn to_micro_time(time: DateTime<Utc>) -> Result<MicroTime> {
    serde_json::from_value(serde_json::Value::String(
        time.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))
    .context("Failed to encode lease timestamp")
}

fn from_micro_time(time: &MicroTime) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Acquires and renews the controller's Lease
pub struct LeaderElector {
    api: Api<Lease>,
    settings: LeaseSettings,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("settings", &self.settings)
            .field("renew_deadline", &self.renew_deadline)
            .field("retry_period", &self.retry_period)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(api: Api<Lease>, settings: LeaseSettings) -> Self {
        Self {
            api,
            settings,
            renew_deadline: Duration::from_secs(LEASE_RENEW_DEADLINE_SECS),
            retry_period: Duration::from_secs(LEASE_RETRY_PERIOD_SECS),
        }
    }

    fn held_spec(&self, acquired: DateTime<Utc>, transitions: i32) -> Result<LeaseSpec> {
        let now = to_micro_time(acquired)?;
        Ok(LeaseSpec {
            holder_identity: Some(self.settings.identity.clone()),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            lease_transitions: Some(transitions),
            ..LeaseSpec::default()
        })
    }

    /// One acquire or renew attempt
    ///
    /// # Errors
    /// Returns an error if the Lease cannot be read or written
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn try_acquire_or_renew(&self) -> Result<LeaseAttempt> {
        let now = Utc::now();
        let existing = self
            .api
            .get_opt(&self.settings.name)
            .await
            .context("Failed to get lease")?;

        let Some(mut lease) = existing else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.settings.name.clone()),
                    namespace: Some(self.settings.namespace.clone()),
                    ..ObjectMeta::default()
                },
                spec: Some(self.held_spec(now, 0)?),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(LeaseAttempt::Held),
                Err(kube::Error::Api(api_err)) if api_err.code == 409 => Ok(LeaseAttempt::Conflict),
                Err(e) => Err(e).context("Failed to create lease"),
            };
        };

        let record = LeaseRecord::from_lease(&lease);
        match decide(Some(&record), &self.settings.identity, now) {
            LeaseDecision::Wait { holder } => {
                debug!(holder = %holder, "Lease held by another replica");
                return Ok(LeaseAttempt::HeldBy(holder));
            }
            LeaseDecision::Create | LeaseDecision::TakeOver => {
                if let Some(previous) = record.holder.as_deref().filter(|h| !h.is_empty()) {
                    info!(previous = %previous, "Taking over expired lease");
                }
                lease.spec = Some(self.held_spec(now, record.transitions + 1)?);
            }
            LeaseDecision::Renew => {
                let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
                spec.renew_time = Some(to_micro_time(now)?);
                spec.lease_duration_seconds = Some(LEASE_DURATION_SECS);
            }
        }

        match self
            .api
            .replace(&self.settings.name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(LeaseAttempt::Held),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => Ok(LeaseAttempt::Conflict),
            Err(e) => Err(e).context("Failed to update lease"),
        }
    }

    /// Retry until the lease is held
    ///
    /// Returns `false` if shutdown was requested first.
    pub async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        info!(
            lease = %self.settings.name,
            namespace = %self.settings.namespace,
            identity = %self.settings.identity,
            "Attempting to acquire leader lease"
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(LeaseAttempt::Held) => {
                    info!(identity = %self.settings.identity, "Acquired leader lease");
                    return true;
                }
                Ok(LeaseAttempt::HeldBy(_) | LeaseAttempt::Conflict) => {}
                Err(e) => warn!(error = %format!("{e:#}"), "Failed to acquire leader lease"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                () = tokio::time::sleep(self.retry_period) => {}
            }
            if *shutdown.borrow() {
                return false;
            }
        }
    }

    /// Keep renewing the lease until shutdown or until it is lost
    pub async fn hold(&self, shutdown: &mut watch::Receiver<bool>) -> LeadershipEnd {
        let mut last_renewal = Instant::now();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return LeadershipEnd::Shutdown;
                    }
                }
                () = tokio::time::sleep(self.retry_period) => {}
            }
            if *shutdown.borrow() {
                return LeadershipEnd::Shutdown;
            }

            match self.try_acquire_or_renew().await {
                Ok(LeaseAttempt::Held) => last_renewal = Instant::now(),
                Ok(LeaseAttempt::HeldBy(holder)) => {
                    warn!(holder = %holder, "Leader lease was taken by another replica");
                    return LeadershipEnd::Lost;
                }
                Ok(LeaseAttempt::Conflict) => debug!("Lease renewal conflicted, retrying"),
                Err(e) => warn!(error = %format!("{e:#}"), "Failed to renew leader lease"),
            }
            if renewal_expired(last_renewal.elapsed(), self.renew_deadline) {
                warn!(identity = %self.settings.identity, "Leader lease lost");
                return LeadershipEnd::Lost;
            }
        }
    }

    /// Give the lease up so a standby replica can take over immediately
    ///
    /// # Errors
    /// Returns an error if the Lease cannot be read or written
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn release(&self) -> Result<()> {
        let Some(mut lease) = self
            .api
            .get_opt(&self.settings.name)
            .await
            .context("Failed to get lease")?
        else {
            return Ok(());
        };
        let record = LeaseRecord::from_lease(&lease);
        if record.holder.as_deref() != Some(self.settings.identity.as_str()) {
            return Ok(());
        }

        let now = to_micro_time(Utc::now())?;
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        spec.holder_identity = None;
        spec.acquire_time = Some(now.clone());
        spec.renew_time = Some(now);
        spec.lease_duration_seconds = Some(1);

        self.api
            .replace(&self.settings.name, &PostParams::default(), &lease)
            .await
            .context("Failed to release lease")?;
        info!(identity = %self.settings.identity, "Released leader lease");
        Ok(())
    }
}
