//! Failure context for one remediation attempt.

use std::fmt::Write as _;

use crate::alert::Alert;
use crate::classifier::FailureMode;
use crate::config::ManifestPaths;
use crate::error::{RemediationError, RemediationResult};
use crate::github::ManifestFile;
use crate::manifest::{self, ManifestDocument};

/// Annotation that points an alert at a specific manifest file.
pub const MANIFEST_PATH_ANNOTATION: &str = "manifest_path";

/// Labels worth surfacing as diagnostics, in display order.
const DIAGNOSTIC_LABELS: &[&str] = &[
    "reason",
    "failure",
    "container_status",
    "container",
    "image",
    "exit_code",
    "probe",
];

/// Annotations worth surfacing as diagnostics, in display order.
const DIAGNOSTIC_ANNOTATIONS: &[&str] = &["description", "message", "runbook_url"];

/// Everything the pipeline knows about the failure it is fixing.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub alert: Alert,
    pub mode: FailureMode,
    /// The manifest file as fetched from the base branch
    pub file: ManifestFile,
    /// The workload document the patch must replace
    pub document: ManifestDocument,
    pub diagnostics: String,
}

impl FailureContext {
    /// Build the context from a fetched manifest file.
    ///
    /// Fails when the file holds no document for the alerted workload.
    pub fn new(alert: Alert, mode: FailureMode, file: ManifestFile) -> RemediationResult<Self> {
        let document = manifest::find_document(&file.content, &alert.resource).ok_or_else(|| {
            RemediationError::GitOperation(format!(
                "no manifest for {} in {}",
                alert.resource, file.path
            ))
        })?;
        let diagnostics = diagnostics(&alert);

        Ok(Self {
            alert,
            mode,
            file,
            document,
            diagnostics,
        })
    }

    /// Path of the manifest being patched.
    #[must_use]
    pub fn manifest_path(&self) -> &str {
        &self.file.path
    }
}

/// Resolve which manifest file to patch for an alert.
#[must_use]
pub fn manifest_path(alert: &Alert, mode: FailureMode, paths: &ManifestPaths) -> String {
    alert
        .annotations
        .get(MANIFEST_PATH_ANNOTATION)
        .filter(|p| !p.trim().is_empty())
        .map_or_else(|| paths.path_for(mode).to_string(), |p| p.trim().to_string())
}

/// Render diagnostic text from the alert's labels and annotations.
#[must_use]
pub fn diagnostics(alert: &Alert) -> String {
    let mut out = String::new();
    for key in DIAGNOSTIC_LABELS {
        if let Some(value) = alert.labels.get(*key) {
            let _ = writeln!(out, "{key}: {value}");
        }
    }
    for key in DIAGNOSTIC_ANNOTATIONS {
        if let Some(value) = alert.annotations.get(*key) {
            let _ = writeln!(out, "{key}: {value}");
        }
    }
    if out.is_empty() {
        out.push_str("no diagnostics attached to the alert\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertStatus, AlertmanagerAlert};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn alert(annotations: &[(&str, &str)]) -> Alert {
        let labels: BTreeMap<String, String> = [("pod", "web-1"), ("reason", "ImagePullBackOff")]
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Alert::from_wire(
            AlertmanagerAlert {
                status: AlertStatus::Firing,
                labels,
                annotations: annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                starts_at: None,
                ends_at: None,
                generator_url: String::new(),
                fingerprint: String::new(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_manifest_path_resolution() {
        let paths = ManifestPaths::default();
        assert_eq!(
            manifest_path(&alert(&[]), FailureMode::ImagePull, &paths),
            "app/imagepullbackoff-fail.yaml"
        );
        assert_eq!(
            manifest_path(&alert(&[("manifest_path", "apps/web.yaml")]), FailureMode::ImagePull, &paths),
            "apps/web.yaml"
        );
    }

    #[test]
    fn test_diagnostics_text() {
        let text = diagnostics(&alert(&[("description", "Back-off pulling image nginx:latestt")]));
        assert_eq!(
            text,
            "reason: ImagePullBackOff\ndescription: Back-off pulling image nginx:latestt\n"
        );
    }

    #[test]
    fn test_context_requires_document() {
        let file = ManifestFile {
            path: "app/other.yaml".to_string(),
            content: "kind: Service\nmetadata:\n  name: web\n".to_string(),
            sha: "s".to_string(),
        };
        let err = FailureContext::new(alert(&[]), FailureMode::ImagePull, file).unwrap_err();
        assert!(matches!(err, RemediationError::GitOperation(_)));
    }
}
