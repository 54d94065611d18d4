//! Remediation orchestrator.
//!
//! Drives each admitted alert through the pipeline:
//!
//! ```text
//! Received -> Classified -> PromptBuilt -> ModelQueried -> PatchValidated -> Published -> Notified
//!                               ^               |
//!                               +---- retry ----+          (any stage) -> Failed
//! ```
//!
//! Pipelines run on spawned tasks, bounded by a semaphore. Each stage owns
//! its retry budget; the model is never re-invoked once a patch validated.

use notify::Notifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::alert::Alert;
use crate::classifier::{self, FailureMode};
use crate::config::{Config, ManifestPaths};
use crate::context::{self, FailureContext};
use crate::error::{RemediationError, RemediationResult};
use crate::github::SourceControl;
use crate::image_check::{self, ImageRegistry};
use crate::llm::InferenceClient;
use crate::prompt::PromptBuilder;
use crate::publisher::{self, PullRequestRecord, Publisher};
use crate::registry::{Admission, AttemptRegistry, AttemptState};
use crate::retry::RetryPolicy;
use crate::validator::{Patch, Rejection, Validator};

/// Outcome of submitting an alert.
#[derive(Debug)]
pub struct Submission {
    pub fingerprint: String,
    pub admission: Admission,
    /// Pipeline task, present only when the alert was admitted
    pub handle: Option<JoinHandle<()>>,
}

/// Runs remediation pipelines.
pub struct Orchestrator {
    registry: Arc<AttemptRegistry>,
    model: Arc<dyn InferenceClient>,
    images: Arc<dyn ImageRegistry>,
    publisher: Publisher,
    prompts: PromptBuilder,
    validator: Validator,
    manifest_paths: ManifestPaths,
    generation: RetryPolicy,
    publishing: RetryPolicy,
    llm_timeout: Duration,
    registry_timeout: Duration,
    workers: Arc<Semaphore>,
}

impl Orchestrator {
    /// Wire an orchestrator from configuration and its collaborators.
    pub fn new(
        config: &Config,
        registry: Arc<AttemptRegistry>,
        model: Arc<dyn InferenceClient>,
        images: Arc<dyn ImageRegistry>,
        vcs: Arc<dyn SourceControl>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, handlebars::TemplateError> {
        let validator = Validator::new(&config.placeholder_denylist);
        let prompts = PromptBuilder::new(validator.denylist())?;
        let publisher = Publisher::new(
            vcs,
            notifier,
            &config.github_branch,
            config.timeouts.vcs,
            config.timeouts.notify,
        );

        Ok(Self {
            registry,
            model,
            images,
            publisher,
            prompts,
            validator,
            manifest_paths: config.manifest_paths.clone(),
            generation: RetryPolicy::generation(&config.retry),
            publishing: RetryPolicy::publish(&config.retry),
            llm_timeout: config.timeouts.llm,
            registry_timeout: config.timeouts.registry,
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
        })
    }

    /// Registry handle.
    #[must_use]
    pub fn registry(&self) -> &Arc<AttemptRegistry> {
        &self.registry
    }

    /// Offer an alert; spawn its pipeline if it is admitted.
    pub fn submit(self: &Arc<Self>, alert: Alert) -> Submission {
        let fingerprint = alert.fingerprint.clone();
        let admission = self.registry.admit(&alert);

        let handle = match admission {
            Admission::Admitted => {
                info!(
                    fingerprint = %fingerprint,
                    resource = %alert.resource,
                    alert = alert.name(),
                    "Alert admitted"
                );
                let this = Arc::clone(self);
                Some(tokio::spawn(async move {
                    let Ok(_permit) = Arc::clone(&this.workers).acquire_owned().await else {
                        error!("Worker pool closed, dropping alert");
                        return;
                    };
                    this.run(alert).await;
                }))
            }
            Admission::Duplicate(state) | Admission::CoolingDown(state) => {
                info!(
                    fingerprint = %fingerprint,
                    state = state.as_str(),
                    outcome = admission.as_str(),
                    "Skipping alert, attempt already exists"
                );
                None
            }
            Admission::Resolved(found) => {
                info!(fingerprint = %fingerprint, found, "Alert resolved");
                None
            }
        };

        Submission {
            fingerprint,
            admission,
            handle,
        }
    }

    /// Run the full pipeline for an admitted alert.
    pub async fn run(&self, alert: Alert) {
        let span = info_span!(
            "remediation",
            fingerprint = %alert.fingerprint,
            resource = %alert.resource
        );
        self.run_pipeline(alert).instrument(span).await;
    }

    async fn run_pipeline(&self, alert: Alert) {
        let fingerprint = alert.fingerprint.clone();

        let mode = match classifier::classify(&alert) {
            Ok(mode) => mode,
            Err(e) => {
                self.finish_failed(&alert, None, "classify", &e, false).await;
                return;
            }
        };
        self.registry.update(&fingerprint, |attempt| {
            attempt.failure_mode = Some(mode);
            attempt.transition(AttemptState::Classified);
        });
        info!(mode = %mode, state = AttemptState::Classified.as_str(), "Alert classified");

        let ctx = match self.build_context(alert.clone(), mode).await {
            Ok(ctx) => ctx,
            Err(e) => {
                self.finish_failed(&alert, Some(mode), "context", &e, false).await;
                return;
            }
        };

        let patch = match self.generate(&ctx).await {
            Ok(patch) => patch,
            Err(e) => {
                self.finish_failed(&alert, Some(mode), "generate", &e, false).await;
                return;
            }
        };
        self.registry.update(&fingerprint, |attempt| {
            attempt.patch = Some(patch.clone());
            attempt.transition(AttemptState::PatchValidated);
        });
        info!(
            state = AttemptState::PatchValidated.as_str(),
            path = %patch.target_path,
            "Patch validated"
        );

        let record = match self.publish(&ctx, &patch).await {
            Ok(record) => record,
            Err(e) => {
                self.finish_failed(&alert, Some(mode), "publish", &e, true).await;
                return;
            }
        };
        self.registry.update(&fingerprint, |attempt| {
            attempt.pull_request = Some(record.clone());
            attempt.transition(AttemptState::Published);
        });

        let notified = self
            .publisher
            .notify(publisher::opened_event(&ctx, &record))
            .await;
        self.registry.update(&fingerprint, |attempt| {
            if let Err(e) = &notified {
                attempt.last_error = Some(e.to_string());
            }
            attempt.transition(AttemptState::Notified);
        });

        match notified {
            Ok(()) => info!(
                state = AttemptState::Notified.as_str(),
                pr_url = %record.url,
                "Remediation complete"
            ),
            Err(e) => warn!(
                state = AttemptState::Notified.as_str(),
                pr_url = %record.url,
                error = %e,
                "Remediation published but notification failed"
            ),
        }
    }

    /// Fetch the manifest once and build the failure context.
    async fn build_context(&self, alert: Alert, mode: FailureMode) -> RemediationResult<FailureContext> {
        let path = context::manifest_path(&alert, mode, &self.manifest_paths);
        let file = self.publisher.fetch_manifest(&path).await?;
        FailureContext::new(alert, mode, file)
    }

    /// Model loop: prompt, generate, validate; retry on invalid output or timeout.
    async fn generate(&self, ctx: &FailureContext) -> RemediationResult<Patch> {
        let fingerprint = &ctx.alert.fingerprint;
        let mut previous: Option<Rejection> = None;
        let mut last_error = None;

        for generation in 1..=self.generation.max_attempts {
            let prompt = self.prompts.build(ctx, previous.as_ref()).map_err(|e| {
                RemediationError::UnsupportedFailureMode(format!(
                    "prompt template for {} failed to render: {e}",
                    ctx.mode
                ))
            })?;
            self.registry.update(fingerprint, |attempt| {
                attempt.generations = generation;
                attempt.transition(AttemptState::PromptBuilt);
            });

            let response = tokio::time::timeout(self.llm_timeout, self.model.generate(&prompt))
                .await
                .unwrap_or_else(|_| {
                    Err(RemediationError::LlmTimeout(format!(
                        "{} did not answer within {}s",
                        self.model.name(),
                        self.llm_timeout.as_secs()
                    )))
                });
            self.registry
                .transition(fingerprint, AttemptState::ModelQueried);

            let error = match response {
                Ok(raw) => {
                    let prior = previous.as_ref().map(|r| r.candidate.as_str());
                    match self.check(&raw, ctx, prior).await {
                        Ok(patch) => {
                            info!(generation, checks = patch.verdict.len(), "Model produced a valid patch");
                            return Ok(patch);
                        }
                        Err(rejection) => RemediationError::LlmInvalidResponse(rejection),
                    }
                }
                Err(e) => e,
            };

            warn!(
                generation,
                max = self.generation.max_attempts,
                category = error.category(),
                error = %error,
                "Model output not usable"
            );
            self.registry
                .update(fingerprint, |attempt| attempt.last_error = Some(error.to_string()));

            if !error.is_retryable() {
                return Err(error);
            }
            if let RemediationError::LlmInvalidResponse(rejection) = &error {
                previous = Some(rejection.clone());
            }
            if self.generation.allows(generation) {
                tokio::time::sleep(self.generation.backoff(generation)).await;
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            RemediationError::LlmTimeout("no generation attempts allowed".to_string())
        }))
    }

    /// Validate a response; image pull fixes must also name a known tag.
    async fn check(&self, raw: &str, ctx: &FailureContext, previous: Option<&str>) -> Result<Patch, Rejection> {
        let patch = self.validator.validate(raw, ctx, previous)?;
        if ctx.mode == FailureMode::ImagePull {
            image_check::verify_images(self.images.as_ref(), patch, self.registry_timeout).await
        } else {
            Ok(patch)
        }
    }

    /// Publish loop: the same patch every try, never re-invoking the model.
    async fn publish(&self, ctx: &FailureContext, patch: &Patch) -> RemediationResult<PullRequestRecord> {
        let fingerprint = &ctx.alert.fingerprint;
        let mut last_error = None;

        for try_number in 1..=self.publishing.max_attempts {
            self.registry
                .update(fingerprint, |attempt| attempt.publish_tries = try_number);

            match self.publisher.publish(ctx, patch, try_number).await {
                Ok(record) => return Ok(record),
                Err(e) => {
                    warn!(
                        try_number,
                        max = self.publishing.max_attempts,
                        category = e.category(),
                        error = %e,
                        "Publish failed"
                    );
                    self.registry
                        .update(fingerprint, |attempt| attempt.last_error = Some(e.to_string()));

                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if self.publishing.allows(try_number) {
                        tokio::time::sleep(self.publishing.backoff(try_number)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RemediationError::GitOperation("no publish attempts allowed".to_string())
        }))
    }

    async fn finish_failed(
        &self,
        alert: &Alert,
        mode: Option<FailureMode>,
        stage: &str,
        error: &RemediationError,
        patch_preserved: bool,
    ) {
        error!(
            stage,
            category = error.category(),
            error = %error,
            state = AttemptState::Failed.as_str(),
            "Remediation failed"
        );
        self.registry
            .update(&alert.fingerprint, |attempt| attempt.fail(stage, error));

        let event = publisher::failed_event(alert, mode, stage, error, patch_preserved);
        if let Err(e) = self.publisher.notify(event).await {
            warn!(error = %e, "Failure notification not delivered");
        }
    }
}
