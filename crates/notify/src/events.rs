//! Notification event types for alert remediation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - remediation landed
    Info,
    /// Warning - something needs a human
    Warning,
    /// Critical - remediation failed
    Critical,
}

impl Severity {
    /// Get the Slack attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#2eb67d",     // Green
            Self::Warning => "#f39c12",  // Orange
            Self::Critical => "#e74c3c", // Red
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A remediation pull request was opened (or an open one was reused).
    RemediationOpened {
        fingerprint: String,
        failure_mode: String,
        /// `kind/name` of the failing workload
        resource: String,
        namespace: String,
        alert_name: String,
        branch: String,
        pr_number: u64,
        pr_url: String,
        /// One-line description of the change
        summary: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A remediation attempt reached a terminal failure.
    RemediationFailed {
        fingerprint: String,
        /// `None` when the alert could not be classified
        #[serde(default)]
        failure_mode: Option<String>,
        resource: String,
        namespace: String,
        alert_name: String,
        /// Pipeline stage that failed (classify, generate, publish, ...)
        stage: String,
        reason: String,
        /// Whether a validated patch is kept for manual follow-up
        #[serde(default)]
        patch_preserved: bool,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::RemediationOpened {
                failure_mode,
                resource,
                ..
            } => format!("Auto-fix PR opened: {failure_mode} in {resource}"),
            Self::RemediationFailed {
                failure_mode: Some(mode),
                resource,
                ..
            } => format!("Auto-fix failed: {mode} in {resource}"),
            Self::RemediationFailed {
                failure_mode: None,
                resource,
                ..
            } => format!("Unsupported alert for {resource}"),
        }
    }

    /// Get the severity/color for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::RemediationOpened { .. } => Severity::Info,
            Self::RemediationFailed {
                failure_mode: None, ..
            } => Severity::Warning,
            Self::RemediationFailed { .. } => Severity::Critical,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RemediationOpened { timestamp, .. }
            | Self::RemediationFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the alert fingerprint this event refers to.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        match self {
            Self::RemediationOpened { fingerprint, .. }
            | Self::RemediationFailed { fingerprint, .. } => fingerprint,
        }
    }
}
