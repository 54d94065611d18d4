//! Remediation publishing: branch, commit, pull request and notification.

use chrono::Utc;
use notify::{Notifier, NotifyEvent};
use serde::Serialize;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::alert::Alert;
use crate::classifier::FailureMode;
use crate::context::FailureContext;
use crate::error::{RemediationError, RemediationResult};
use crate::github::{FileCommit, ManifestFile, PullRequestDraft, SourceControl};
use crate::validator::Patch;

/// A published remediation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRecord {
    pub branch: String,
    /// Base branch commit the fix branched from (unknown when reused)
    pub base_commit: Option<String>,
    pub head_commit: String,
    pub number: u64,
    pub url: String,
    /// Whether an already-open pull request was reused
    pub reused: bool,
}

/// Branch prefix shared by every publish try for a workload + mode.
#[must_use]
pub fn branch_prefix(alert: &Alert, mode: FailureMode) -> String {
    format!("fix/{}-{}-", alert.resource.name, mode.slug())
}

/// Branch name for one publish try (1-based).
#[must_use]
pub fn branch_name(alert: &Alert, mode: FailureMode, try_number: u32) -> String {
    format!("{}{try_number}", branch_prefix(alert, mode))
}

/// Line in the pull request body that ties it to one alert fingerprint.
#[must_use]
pub fn fingerprint_marker(fingerprint: &str) -> String {
    format!("Fingerprint: `{fingerprint}`")
}

/// Pull request title.
#[must_use]
pub fn pull_request_title(ctx: &FailureContext) -> String {
    format!(
        "Auto-fix: resolve {} in {}",
        ctx.mode.display_name(),
        ctx.alert.resource.name
    )
}

/// Pull request body.
#[must_use]
pub fn pull_request_body(ctx: &FailureContext, patch: &Patch) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## Automated remediation\n");
    let _ = writeln!(body, "**Failure mode:** {}", ctx.mode.display_name());
    let _ = writeln!(body, "**Resource:** {} (namespace `{}`)", ctx.alert.resource, ctx.alert.resource.namespace);
    let _ = writeln!(body, "**Manifest:** `{}`\n", patch.target_path);
    let _ = writeln!(body, "### Alert\n```\n{}\n```\n", ctx.alert.render_summary());
    let _ = writeln!(body, "### Diagnostics\n```\n{}```\n", ctx.diagnostics);
    let _ = writeln!(body, "### Corrected {}\n```yaml\n{}```\n", ctx.document.target, patch.document);
    let _ = writeln!(body, "### Impact");
    let _ = writeln!(
        body,
        "Merging lets the GitOps controller roll out the corrected manifest. Only the `{}` document changes; every other document in the file is untouched.\n",
        ctx.document.target
    );
    body.push_str(&fingerprint_marker(&ctx.alert.fingerprint));
    body
}

/// Event for a successfully published remediation.
#[must_use]
pub fn opened_event(ctx: &FailureContext, record: &PullRequestRecord) -> NotifyEvent {
    NotifyEvent::RemediationOpened {
        fingerprint: ctx.alert.fingerprint.clone(),
        failure_mode: ctx.mode.display_name().to_string(),
        resource: ctx.alert.resource.to_string(),
        namespace: ctx.alert.resource.namespace.clone(),
        alert_name: ctx.alert.name().to_string(),
        branch: record.branch.clone(),
        pr_number: record.number,
        pr_url: record.url.clone(),
        summary: format!("Updated {} in `{}`", ctx.document.target, ctx.manifest_path()),
        timestamp: Utc::now(),
    }
}

/// Event for an attempt that ended in failure.
#[must_use]
pub fn failed_event(
    alert: &Alert,
    mode: Option<FailureMode>,
    stage: &str,
    error: &RemediationError,
    patch_preserved: bool,
) -> NotifyEvent {
    NotifyEvent::RemediationFailed {
        fingerprint: alert.fingerprint.clone(),
        failure_mode: mode.map(|m| m.display_name().to_string()),
        resource: alert.resource.to_string(),
        namespace: alert.resource.namespace.clone(),
        alert_name: alert.name().to_string(),
        stage: stage.to_string(),
        reason: format!("{} ({})", error, error.category()),
        patch_preserved,
        timestamp: Utc::now(),
    }
}

/// Branch suffixes skipped past existing refs before a publish try gives up.
const MAX_BRANCH_SKIPS: u32 = 32;

/// Lands validated patches in the GitOps repository and reports outcomes.
pub struct Publisher {
    vcs: Arc<dyn SourceControl>,
    notifier: Arc<Notifier>,
    base_branch: String,
    vcs_timeout: Duration,
    notify_timeout: Duration,
}

impl Publisher {
    #[must_use]
    pub fn new(
        vcs: Arc<dyn SourceControl>,
        notifier: Arc<Notifier>,
        base_branch: &str,
        vcs_timeout: Duration,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            vcs,
            notifier,
            base_branch: base_branch.to_string(),
            vcs_timeout,
            notify_timeout,
        }
    }

    /// Run one version-control call under the VCS timeout.
    async fn call<T, F>(&self, what: &str, fut: F) -> RemediationResult<T>
    where
        F: Future<Output = RemediationResult<T>>,
    {
        tokio::time::timeout(self.vcs_timeout, fut)
            .await
            .map_err(|_| {
                RemediationError::GitOperation(format!(
                    "{what} timed out after {}s",
                    self.vcs_timeout.as_secs()
                ))
            })?
    }

    /// Fetch the manifest file from the base branch.
    pub async fn fetch_manifest(&self, path: &str) -> RemediationResult<ManifestFile> {
        self.call("fetch manifest", self.vcs.get_file(path, &self.base_branch))
            .await
    }

    /// Publish a patch as a pull request.
    ///
    /// Reuses an open pull request carrying this alert's fingerprint marker
    /// when there is one. Otherwise creates `fix/{name}-{slug}-{n}` from the
    /// base branch head, starting at `n = try_number` and moving past suffixes
    /// that already exist, commits the patched file and opens the pull request.
    pub async fn publish(
        &self,
        ctx: &FailureContext,
        patch: &Patch,
        try_number: u32,
    ) -> RemediationResult<PullRequestRecord> {
        let prefix = branch_prefix(&ctx.alert, ctx.mode);

        let marker = fingerprint_marker(&ctx.alert.fingerprint);
        let existing = self
            .call("list pull requests", self.vcs.open_pull_requests(&prefix))
            .await?
            .into_iter()
            .find(|pr| pr.body.as_deref().is_some_and(|body| body.contains(&marker)));

        if let Some(existing) = existing {
            info!(
                fingerprint = %ctx.alert.fingerprint,
                pr_number = existing.number,
                branch = %existing.head_ref,
                "Open remediation pull request already exists, reusing it"
            );
            return Ok(PullRequestRecord {
                branch: existing.head_ref,
                base_commit: None,
                head_commit: existing.head_sha,
                number: existing.number,
                url: existing.url,
                reused: true,
            });
        }

        let base_commit = self
            .call("read base branch", self.vcs.branch_head(&self.base_branch))
            .await?;
        let branch = self.create_free_branch(ctx, try_number, &base_commit).await?;

        let title = pull_request_title(ctx);
        let head_commit = self
            .call(
                "commit manifest",
                self.vcs.commit_file(&FileCommit {
                    path: patch.target_path.clone(),
                    branch: branch.clone(),
                    message: title.clone(),
                    content: patch.content.clone(),
                    blob_sha: ctx.file.sha.clone(),
                }),
            )
            .await?;

        let pr = self
            .call(
                "open pull request",
                self.vcs.open_pull_request(&PullRequestDraft {
                    title,
                    body: pull_request_body(ctx, patch),
                    head: branch.clone(),
                    base: self.base_branch.clone(),
                }),
            )
            .await?;

        info!(
            fingerprint = %ctx.alert.fingerprint,
            branch = %branch,
            pr_number = pr.number,
            "Opened remediation pull request"
        );

        Ok(PullRequestRecord {
            branch,
            base_commit: Some(base_commit),
            head_commit,
            number: pr.number,
            url: pr.url,
            reused: false,
        })
    }

    /// Create the first branch from `try_number` on that does not exist yet.
    async fn create_free_branch(
        &self,
        ctx: &FailureContext,
        try_number: u32,
        base_commit: &str,
    ) -> RemediationResult<String> {
        let mut suffix = try_number;
        loop {
            let branch = branch_name(&ctx.alert, ctx.mode, suffix);
            match self
                .call("create branch", self.vcs.create_branch(&branch, base_commit))
                .await
            {
                Ok(()) => return Ok(branch),
                Err(e) if e.is_existing_ref() && suffix < try_number + MAX_BRANCH_SKIPS => {
                    debug!(
                        fingerprint = %ctx.alert.fingerprint,
                        branch = %branch,
                        "Branch already exists, trying the next suffix"
                    );
                    suffix += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deliver an outcome notification.
    ///
    /// Never fatal to the attempt; the caller records the error.
    pub async fn notify(&self, event: NotifyEvent) -> RemediationResult<()> {
        let deliveries = tokio::time::timeout(self.notify_timeout, self.notifier.deliver(&event))
            .await
            .map_err(|_| {
                RemediationError::SlackNotify(format!(
                    "notification timed out after {}s",
                    self.notify_timeout.as_secs()
                ))
            })?;

        deliveries
            .into_iter()
            .find_map(|delivery| delivery.result.err())
            .map_or(Ok(()), |e| Err(RemediationError::from(e)))
    }
}
