//! Attempt registry.
//!
//! Process-wide map of remediation attempts keyed by alert fingerprint.
//! Admission is a compare-and-insert under the map's per-key entry lock, so
//! two racing alerts for the same failure cannot both start an attempt.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::alert::{Alert, ResourceRef};
use crate::classifier::FailureMode;
use crate::error::RemediationError;
use crate::publisher::PullRequestRecord;
use crate::validator::Patch;

/// Pipeline state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Received,
    Classified,
    PromptBuilt,
    ModelQueried,
    PatchValidated,
    Published,
    Notified,
    Failed,
}

impl AttemptState {
    /// Check if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Notified | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::PromptBuilt => "prompt_built",
            Self::ModelQueried => "model_queried",
            Self::PatchValidated => "patch_validated",
            Self::Published => "published",
            Self::Notified => "notified",
            Self::Failed => "failed",
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Stage that failed (classify, context, generate, publish)
    pub stage: String,
    /// Error category (e.g. `LLMInvalidResponseError`)
    pub category: String,
    pub message: String,
}

/// One remediation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationAttempt {
    pub fingerprint: String,
    pub resource: ResourceRef,
    pub alert_name: String,
    pub failure_mode: Option<FailureMode>,
    pub state: AttemptState,
    /// Model generations issued
    pub generations: u32,
    /// Publish tries issued
    pub publish_tries: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureRecord>,
    /// Validated patch, kept even when publishing fails
    pub patch: Option<Patch>,
    pub pull_request: Option<PullRequestRecord>,
    /// A resolved notification arrived for this alert
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RemediationAttempt {
    fn new(alert: &Alert, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: alert.fingerprint.clone(),
            resource: alert.resource.clone(),
            alert_name: alert.name().to_string(),
            failure_mode: None,
            state: AttemptState::Received,
            generations: 0,
            publish_tries: 0,
            last_error: None,
            failure: None,
            patch: None,
            pull_request: None,
            resolved: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `state`, stamping timestamps.
    pub fn transition(&mut self, state: AttemptState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        if state.is_terminal() {
            self.finished_at = Some(now);
        }
    }

    /// Move to `Failed`, recording the error and the stage it came from.
    pub fn fail(&mut self, stage: &str, error: &RemediationError) {
        self.last_error = Some(error.to_string());
        self.failure = Some(FailureRecord {
            stage: stage.to_string(),
            category: error.category().to_string(),
            message: error.to_string(),
        });
        self.transition(AttemptState::Failed);
    }
}

/// Result of offering an alert to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A fresh attempt was created; the caller must run it
    Admitted,
    /// A non-terminal attempt already owns this fingerprint
    Duplicate(AttemptState),
    /// A terminal attempt finished within the cool-down window
    CoolingDown(AttemptState),
    /// Resolved alert; `true` when an attempt was flagged
    Resolved(bool),
}

impl Admission {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admitted => "accepted",
            Self::Duplicate(_) => "duplicate",
            Self::CoolingDown(_) => "cooling_down",
            Self::Resolved(_) => "resolved",
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Registry of remediation attempts.
#[derive(Debug)]
pub struct AttemptRegistry {
    attempts: DashMap<String, RemediationAttempt>,
    retention: chrono::Duration,
    cooldown: chrono::Duration,
}

impl AttemptRegistry {
    /// Create a registry.
    ///
    /// Terminal attempts are kept (and suppress re-fired alerts) for
    /// `cooldown`; non-terminal attempts are dropped after `retention`.
    #[must_use]
    pub fn new(retention: Duration, cooldown: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            retention: chrono_duration(retention),
            cooldown: chrono_duration(cooldown),
        }
    }

    /// Offer an alert for admission.
    pub fn admit(&self, alert: &Alert) -> Admission {
        self.admit_at(alert, Utc::now())
    }

    /// Offer an alert for admission at a given time.
    pub fn admit_at(&self, alert: &Alert, now: DateTime<Utc>) -> Admission {
        if !alert.is_firing() {
            let found = self
                .attempts
                .get_mut(&alert.fingerprint)
                .map(|mut attempt| {
                    attempt.resolved = true;
                    attempt.updated_at = now;
                })
                .is_some();
            debug!(fingerprint = %alert.fingerprint, found, "Alert resolved");
            return Admission::Resolved(found);
        }

        match self.attempts.entry(alert.fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                if !existing.state.is_terminal() {
                    return Admission::Duplicate(existing.state);
                }
                let cooling = existing
                    .finished_at
                    .is_some_and(|finished| now < finished + self.cooldown);
                if cooling {
                    return Admission::CoolingDown(existing.state);
                }
                entry.insert(RemediationAttempt::new(alert, now));
                Admission::Admitted
            }
            Entry::Vacant(entry) => {
                entry.insert(RemediationAttempt::new(alert, now));
                Admission::Admitted
            }
        }
    }

    /// Apply `f` to an attempt. Returns `false` if the attempt is gone.
    pub fn update<F>(&self, fingerprint: &str, f: F) -> bool
    where
        F: FnOnce(&mut RemediationAttempt),
    {
        self.attempts
            .get_mut(fingerprint)
            .map(|mut attempt| f(attempt.value_mut()))
            .is_some()
    }

    /// Move an attempt to `state`.
    pub fn transition(&self, fingerprint: &str, state: AttemptState) {
        self.update(fingerprint, |attempt| attempt.transition(state));
    }

    /// Snapshot one attempt.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<RemediationAttempt> {
        self.attempts.get(fingerprint).map(|a| a.value().clone())
    }

    /// Snapshot every attempt, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RemediationAttempt> {
        let mut attempts: Vec<RemediationAttempt> =
            self.attempts.iter().map(|a| a.value().clone()).collect();
        attempts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        attempts
    }

    /// Number of attempts not yet in a terminal state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| !a.state.is_terminal())
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Drop expired attempts. Returns how many were evicted.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|_, attempt| {
            if attempt.state.is_terminal() {
                let finished = attempt.finished_at.unwrap_or(attempt.updated_at);
                now < finished + self.cooldown
            } else {
                now < attempt.created_at + self.retention
            }
        });
        let evicted = before.saturating_sub(self.attempts.len());
        if evicted > 0 {
            info!(evicted, remaining = self.attempts.len(), "Evicted expired attempts");
        }
        evicted
    }

    /// Spawn a background task that evicts expired attempts every `every`.
    pub fn spawn_eviction(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.evict_expired(Utc::now());
            }
        })
    }
}
