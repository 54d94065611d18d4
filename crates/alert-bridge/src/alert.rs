//! Alert types: Alertmanager wire payload and the immutable domain alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RemediationError, RemediationResult};

/// Label keys that carry a workload name, in lookup order.
const WORKLOAD_LABELS: &[(&str, &str)] = &[
    ("deployment", "Deployment"),
    ("statefulset", "StatefulSet"),
    ("daemonset", "DaemonSet"),
    ("replicaset", "ReplicaSet"),
    ("job", "Job"),
    ("cronjob", "CronJob"),
    ("pod", "Pod"),
];

/// Hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Alertmanager webhook payload.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    /// Version of the payload format
    #[serde(default)]
    pub version: String,
    /// Unique identifier for this group of alerts
    #[serde(default)]
    pub group_key: String,
    /// Status of the group: "firing" or "resolved"
    #[serde(default)]
    pub status: String,
    /// Receiver that matched this group
    #[serde(default)]
    pub receiver: String,
    /// Labels common to all alerts
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    /// External URL for Alertmanager
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
    /// Alerts in this notification
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Individual alert from Alertmanager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Status: "firing" or "resolved"
    pub status: AlertStatus,
    /// Alert labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Alert annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// When the alert started firing
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// When the alert was resolved (zero time while firing)
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// URL to the alert source
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
    /// Alertmanager's own fingerprint (kept for reference only)
    #[serde(default)]
    pub fingerprint: String,
}

/// Alert status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    /// Get the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

/// Identity of the failing workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: String,
    /// Canonical Kubernetes kind (e.g. `Deployment`, `Pod`)
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    /// Extract the resource reference from alert labels.
    ///
    /// An explicit `kind` + `name` pair wins; otherwise the first workload
    /// label found (deployment, statefulset, ..., pod) is used.
    #[must_use]
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let namespace = labels
            .get("namespace")
            .filter(|ns| !ns.is_empty())
            .cloned()
            .unwrap_or_else(|| "default".to_string());

        if let (Some(kind), Some(name)) = (labels.get("kind"), labels.get("name")) {
            if !kind.is_empty() && !name.is_empty() {
                return Some(Self {
                    namespace,
                    kind: canonical_kind(kind),
                    name: name.clone(),
                });
            }
        }

        WORKLOAD_LABELS.iter().find_map(|(label, kind)| {
            labels
                .get(*label)
                .filter(|name| !name.is_empty())
                .map(|name| Self {
                    namespace: namespace.clone(),
                    kind: (*kind).to_string(),
                    name: name.clone(),
                })
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Check whether a kind names a workload that runs containers.
#[must_use]
pub fn is_workload_kind(kind: &str) -> bool {
    WORKLOAD_LABELS
        .iter()
        .any(|(_, canonical)| canonical.eq_ignore_ascii_case(kind))
}

/// Map a free-form kind label onto the canonical Kubernetes spelling.
fn canonical_kind(kind: &str) -> String {
    WORKLOAD_LABELS
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(kind))
        .map_or_else(|| kind.to_string(), |(_, canonical)| (*canonical).to_string())
}

/// A received alert. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Stable hash of resource identity + failure label
    pub fingerprint: String,
    pub resource: ResourceRef,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub status: AlertStatus,
    pub starts_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl Alert {
    /// Build a domain alert from its wire form.
    ///
    /// Fails with `AlertParse` when the alert carries no resource reference.
    pub fn from_wire(wire: AlertmanagerAlert, received_at: DateTime<Utc>) -> RemediationResult<Self> {
        let resource = ResourceRef::from_labels(&wire.labels).ok_or_else(|| {
            RemediationError::AlertParse(format!(
                "alert '{}' has no resource reference (expected a pod, deployment, statefulset, daemonset, replicaset, job or cronjob label)",
                wire.labels.get("alertname").map_or("unknown", String::as_str)
            ))
        })?;

        let failure_label = failure_label(&wire.labels);
        let fingerprint = fingerprint(&resource, failure_label);

        Ok(Self {
            fingerprint,
            resource,
            labels: wire.labels,
            annotations: wire.annotations,
            status: wire.status,
            starts_at: wire.starts_at,
            received_at,
        })
    }

    /// Get the alert name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map_or("unknown", String::as_str)
    }

    /// Get the failure label used for fingerprinting.
    #[must_use]
    pub fn failure_label(&self) -> &str {
        failure_label(&self.labels)
    }

    /// Check if this is a firing alert.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }

    /// Get the summary annotation.
    #[must_use]
    pub fn summary(&self) -> &str {
        self.annotations.get("summary").map_or("-", String::as_str)
    }

    /// Get the description annotation.
    #[must_use]
    pub fn description(&self) -> &str {
        self.annotations
            .get("description")
            .map_or("-", String::as_str)
    }

    /// Render a short, human-readable summary of the alert.
    #[must_use]
    pub fn render_summary(&self) -> String {
        let starts_at = self
            .starts_at
            .map_or_else(|| "N/A".to_string(), |t| t.to_rfc3339());

        format!(
            "Alert: {}\nStatus: {}\nNamespace: {}\nResource: {}\nContainer: {}\nStarts At: {}\nSummary: {}\nDescription: {}",
            self.name(),
            self.status.as_str().to_uppercase(),
            self.resource.namespace,
            self.resource,
            self.labels.get("container").map_or("-", String::as_str),
            starts_at,
            self.summary(),
            self.description(),
        )
    }
}

fn failure_label(labels: &BTreeMap<String, String>) -> &str {
    labels
        .get("reason")
        .or_else(|| labels.get("alertname"))
        .map_or("unknown", String::as_str)
}

/// Compute the dedupe fingerprint for a resource + failure label.
#[must_use]
pub fn fingerprint(resource: &ResourceRef, failure_label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource.namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(resource.kind.as_bytes());
    hasher.update(b"/");
    hasher.update(resource.name.as_bytes());
    hasher.update(b"|");
    hasher.update(failure_label.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Parse an inbound webhook body into domain alerts.
///
/// The payload is accepted or rejected as a whole: any malformed alert
/// rejects the entire group so no attempt is created from it.
pub fn parse_payload(body: &[u8], received_at: DateTime<Utc>) -> RemediationResult<Vec<Alert>> {
    let payload: AlertmanagerPayload = serde_json::from_slice(body)
        .map_err(|e| RemediationError::AlertParse(format!("invalid payload: {e}")))?;

    if payload.alerts.is_empty() {
        return Err(RemediationError::AlertParse("no alerts received".to_string()));
    }

    payload
        .alerts
        .into_iter()
        .map(|wire| Alert::from_wire(wire, received_at))
        .collect()
}
