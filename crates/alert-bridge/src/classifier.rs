//! Failure classification.
//!
//! Maps an alert onto one of the failure modes the bridge knows how to
//! remediate. Signals, in priority order:
//! - An exact Kubernetes `reason` label (decisive)
//! - Keyword patterns over the symptom labels
//!
//! Anything that matches no mode, or more than one, is unsupported.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use crate::alert::Alert;
use crate::error::{RemediationError, RemediationResult};

/// Labels inspected for symptoms.
const SYMPTOM_LABELS: &[&str] = &["reason", "alertname", "failure", "container_status"];

/// Failure modes the bridge can remediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    ImagePull,
    ReadinessProbe,
    LivenessProbe,
    CommandFailure,
}

impl FailureMode {
    /// All failure modes.
    pub const ALL: [Self; 4] = [
        Self::ImagePull,
        Self::ReadinessProbe,
        Self::LivenessProbe,
        Self::CommandFailure,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::ImagePull => "ImagePullBackOff",
            Self::ReadinessProbe => "Readiness probe failure",
            Self::LivenessProbe => "Liveness probe failure",
            Self::CommandFailure => "Command failure",
        }
    }

    /// Slug used in branch names.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::ImagePull => "imagepullbackoff",
            Self::ReadinessProbe => "readinessprobe",
            Self::LivenessProbe => "livenessprobe",
            Self::CommandFailure => "commandfailure",
        }
    }

    /// Suffix of the `MANIFEST_PATH_<MODE>` override variable.
    #[must_use]
    pub const fn env_suffix(self) -> &'static str {
        match self {
            Self::ImagePull => "IMAGE_PULL",
            Self::ReadinessProbe => "READINESS_PROBE",
            Self::LivenessProbe => "LIVENESS_PROBE",
            Self::CommandFailure => "COMMAND_FAILURE",
        }
    }

    /// Manifest path used when no override is configured.
    #[must_use]
    pub const fn default_manifest_path(self) -> &'static str {
        match self {
            Self::ImagePull => "app/imagepullbackoff-fail.yaml",
            Self::ReadinessProbe => "app/readiness-fail.yaml",
            Self::LivenessProbe => "app/liveness-fail.yaml",
            Self::CommandFailure => "app/commandfail-fail.yaml",
        }
    }

    /// Template name registered with the prompt builder.
    #[must_use]
    pub const fn template_name(self) -> &'static str {
        match self {
            Self::ImagePull => "image_pull",
            Self::ReadinessProbe => "readiness_probe",
            Self::LivenessProbe => "liveness_probe",
            Self::CommandFailure => "command_failure",
        }
    }

    fn patterns(self) -> &'static [Regex] {
        match self {
            Self::ImagePull => &IMAGE_PULL_PATTERNS,
            Self::ReadinessProbe => &READINESS_PATTERNS,
            Self::LivenessProbe => &LIVENESS_PATTERNS,
            Self::CommandFailure => &COMMAND_PATTERNS,
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Kubernetes container reasons that identify a mode on their own.
const EXACT_REASONS: &[(&str, FailureMode)] = &[
    ("ImagePullBackOff", FailureMode::ImagePull),
    ("ErrImagePull", FailureMode::ImagePull),
    ("InvalidImageName", FailureMode::ImagePull),
    ("ReadinessProbeFailed", FailureMode::ReadinessProbe),
    ("LivenessProbeFailed", FailureMode::LivenessProbe),
    ("CrashLoopBackOff", FailureMode::CommandFailure),
    ("RunContainerError", FailureMode::CommandFailure),
    ("CreateContainerError", FailureMode::CommandFailure),
    ("ContainerCannotRun", FailureMode::CommandFailure),
];

static IMAGE_PULL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)imagepullbackoff").unwrap(),
        Regex::new(r"(?i)errimagepull").unwrap(),
        Regex::new(r"(?i)invalidimagename").unwrap(),
        Regex::new(r"(?i)image\s*pull").unwrap(),
    ]
});

static READINESS_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![Regex::new(r"(?i)readiness").unwrap()]);

static LIVENESS_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![Regex::new(r"(?i)liveness").unwrap()]);

static COMMAND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)crash\s*loop").unwrap(),
        Regex::new(r"(?i)runcontainererror").unwrap(),
        Regex::new(r"(?i)createcontainererror").unwrap(),
        Regex::new(r"(?i)\bcommand\b").unwrap(),
        Regex::new(r"(?i)\bexec\b").unwrap(),
        Regex::new(r"(?i)entrypoint").unwrap(),
        Regex::new(r"(?i)exit\s*code").unwrap(),
        Regex::new(r"(?i)container\s*exited").unwrap(),
    ]
});

/// Classify an alert into a failure mode.
///
/// Pure: inspects labels only and has no side effects.
pub fn classify(alert: &Alert) -> RemediationResult<FailureMode> {
    if let Some(reason) = alert.labels.get("reason") {
        if let Some((_, mode)) = EXACT_REASONS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(reason.trim()))
        {
            return Ok(*mode);
        }
    }

    let symptoms: Vec<&str> = SYMPTOM_LABELS
        .iter()
        .filter_map(|label| alert.labels.get(*label))
        .map(String::as_str)
        .collect();

    let matched: BTreeSet<FailureMode> = FailureMode::ALL
        .into_iter()
        .filter(|mode| {
            mode.patterns()
                .iter()
                .any(|pattern| symptoms.iter().any(|s| pattern.is_match(s)))
        })
        .collect();

    let mut modes = matched.iter();
    match (modes.next(), modes.next()) {
        (Some(mode), None) => Ok(*mode),
        (None, _) => Err(RemediationError::UnsupportedFailureMode(format!(
            "no known failure symptom in {} ({})",
            alert.resource,
            describe_symptoms(&symptoms)
        ))),
        (Some(_), Some(_)) => Err(RemediationError::UnsupportedFailureMode(format!(
            "ambiguous symptoms for {}: {} all match",
            alert.resource,
            matched
                .iter()
                .map(|m| m.display_name())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn describe_symptoms(symptoms: &[&str]) -> String {
    if symptoms.is_empty() {
        "no symptom labels".to_string()
    } else {
        symptoms.join(", ")
    }
}
