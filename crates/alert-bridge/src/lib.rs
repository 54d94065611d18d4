//! Alert-to-remediation bridge.
//!
//! Receives Alertmanager webhooks for failing Kubernetes workloads, asks a
//! language model for a corrected manifest, validates it, and lands it as a
//! GitHub pull request with a Slack notification.
//!
//! # Flow
//!
//! 1. [`server`] parses the payload and offers each alert to the
//!    [`registry`] (dedupe by fingerprint)
//! 2. [`orchestrator`] classifies the failure ([`classifier`]), fetches the
//!    manifest ([`publisher`], [`github`]) and builds a [`context`]
//! 3. [`prompt`] + [`llm`] + [`validator`] loop until a valid [`Patch`] exists;
//!    image pull fixes are also checked against the registry ([`image_check`])
//! 4. [`publisher`] opens the pull request and notifies via `notify`

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod github;
pub mod image_check;
pub mod llm;
pub mod manifest;
pub mod orchestrator;
pub mod prompt;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod server;
pub mod validator;

pub use alert::{Alert, AlertStatus, AlertmanagerAlert, AlertmanagerPayload, ResourceRef};
pub use classifier::{classify, FailureMode};
pub use config::{Config, ConfigError};
pub use context::FailureContext;
pub use error::{RemediationError, RemediationResult};
pub use github::{GitHubClient, SourceControl};
pub use image_check::{DockerHubClient, ImageLookup, ImageRef, ImageRegistry};
pub use llm::{InferenceClient, OllamaClient};
pub use orchestrator::{Orchestrator, Submission};
pub use publisher::{PullRequestRecord, Publisher};
pub use registry::{Admission, AttemptRegistry, AttemptState, RemediationAttempt};
pub use validator::{Patch, Rejection, RejectionKind, Validator};
