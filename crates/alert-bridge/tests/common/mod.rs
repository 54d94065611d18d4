//! Shared fakes for integration tests.

#![allow(dead_code)]

use alert_bridge::github::{FileCommit, ManifestFile, PullRequest, PullRequestDraft};
use alert_bridge::{
    AttemptRegistry, Config, ImageLookup, ImageRef, ImageRegistry, InferenceClient, Orchestrator,
    RemediationError, RemediationResult, SourceControl,
};
use async_trait::async_trait;
use notify::{ChannelError, Notifier, NotifyChannel, NotifyEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MANIFEST_PATH: &str = "app/imagepullbackoff-fail.yaml";

pub const BROKEN_MANIFEST: &str = "\
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
    - port: 80
---
apiVersion: v1
kind: Pod
metadata:
  name: web-1
  namespace: default
spec:
  containers:
    - name: web
      image: nginx:latestt
";

pub const FIXED_POD: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: web-1
  namespace: default
spec:
  containers:
    - name: web
      image: nginx:1.27
";

pub const PLACEHOLDER_POD: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: web-1
  namespace: default
spec:
  containers:
    - name: web
      image: <your-image-here>
";

/// Wrap a document the way models usually answer.
pub fn fenced(document: &str) -> String {
    format!("The image tag is misspelled. Corrected manifest:\n\n```yaml\n{document}```\n")
}

/// Configuration with fast retries.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("OLLAMA_URL", "http://ollama.test/api/generate"),
        ("GITHUB_TOKEN", "ghp_test"),
        ("GITHUB_REPO", "acme/gitops"),
        ("SLACK_WEBHOOK_URL", "https://hooks.slack.test/T/B/X"),
        ("RETRY_BASE_DELAY_MS", "1"),
        ("RETRY_MAX_DELAY_MS", "5"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    Config::from_lookup(move |key: &str| vars.get(key).cloned()).unwrap()
}

/// Alertmanager payload for a single firing alert.
pub fn payload(labels: serde_json::Value) -> serde_json::Value {
    payload_with_status("firing", labels)
}

pub fn payload_with_status(status: &str, labels: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "version": "4",
        "status": status,
        "receiver": "alert-bridge",
        "alerts": [{
            "status": status,
            "labels": labels,
            "annotations": {
                "summary": "Pod is not healthy",
                "description": "Container web has been failing for 5 minutes"
            },
            "startsAt": "2026-10-19T08:00:00Z",
            "endsAt": "0001-01-01T00:00:00Z",
            "generatorURL": "http://prometheus/graph"
        }]
    })
}

pub fn image_pull_labels(pod: &str) -> serde_json::Value {
    serde_json::json!({
        "alertname": "KubePodNotReady",
        "reason": "ImagePullBackOff",
        "namespace": "default",
        "pod": pod,
        "container": "web"
    })
}

/// Parse a payload into domain alerts.
pub fn alerts(payload: &serde_json::Value) -> Vec<alert_bridge::Alert> {
    alert_bridge::alert::parse_payload(payload.to_string().as_bytes(), chrono::Utc::now()).unwrap()
}

/// Scripted model. Pops responses in order and repeats the last one.
pub struct FakeModel {
    responses: Mutex<VecDeque<RemediationResult<String>>>,
    last: Mutex<Option<RemediationResult<String>>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicU32,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeModel {
    pub fn new(responses: Vec<RemediationResult<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(response: &str) -> Self {
        Self::new(vec![Ok(response.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for FakeModel {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate(&self, prompt: &str) -> RemediationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(RemediationError::LlmTimeout("no script".to_string()))),
        }
    }
}

/// In-memory repository.
pub struct FakeVcs {
    files: Mutex<HashMap<String, ManifestFile>>,
    pub branches: Mutex<Vec<(String, String)>>,
    pub commits: Mutex<Vec<FileCommit>>,
    pub pulls: Mutex<Vec<PullRequest>>,
    pub open_pulls: Mutex<Vec<PullRequest>>,
    /// Number of upcoming `commit_file` calls that fail with a 502
    pub failing_commits: AtomicU32,
    pub fail_fetch: bool,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::with_file(MANIFEST_PATH, BROKEN_MANIFEST)
    }

    pub fn with_file(path: &str, content: &str) -> Self {
        let mut files = HashMap::new();
        files.insert(
            path.to_string(),
            ManifestFile {
                path: path.to_string(),
                content: content.to_string(),
                sha: "blob-base".to_string(),
            },
        );
        Self {
            files: Mutex::new(files),
            branches: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            open_pulls: Mutex::new(Vec::new()),
            failing_commits: AtomicU32::new(0),
            fail_fetch: false,
        }
    }

    pub fn failing_commits(self, n: u32) -> Self {
        self.failing_commits.store(n, Ordering::SeqCst);
        self
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.branches.lock().unwrap().iter().map(|(b, _)| b.clone()).collect()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceControl for FakeVcs {
    async fn get_file(&self, path: &str, _branch: &str) -> RemediationResult<ManifestFile> {
        if self.fail_fetch {
            return Err(RemediationError::GitHubApi {
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| RemediationError::GitHubApi {
                status: 404,
                message: "Not Found".to_string(),
            })
    }

    async fn branch_head(&self, _branch: &str) -> RemediationResult<String> {
        Ok("base-sha".to_string())
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> RemediationResult<()> {
        let mut branches = self.branches.lock().unwrap();
        if branches.iter().any(|(b, _)| b == branch) {
            return Err(RemediationError::GitHubApi {
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        branches.push((branch.to_string(), sha.to_string()));
        Ok(())
    }

    async fn commit_file(&self, commit: &FileCommit) -> RemediationResult<String> {
        self.commits.lock().unwrap().push(commit.clone());
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(RemediationError::GitHubApi {
                status: 502,
                message: "Bad Gateway".to_string(),
            });
        }
        Ok(format!("commit-{}", commit.branch))
    }

    async fn open_pull_request(&self, draft: &PullRequestDraft) -> RemediationResult<PullRequest> {
        let mut pulls = self.pulls.lock().unwrap();
        let number = 100 + pulls.len() as u64;
        let pr = PullRequest {
            number,
            url: format!("https://github.com/acme/gitops/pull/{number}"),
            head_ref: draft.head.clone(),
            head_sha: format!("commit-{}", draft.head),
            body: Some(draft.body.clone()),
        };
        pulls.push(pr.clone());
        self.open_pulls.lock().unwrap().push(pr.clone());
        Ok(pr)
    }

    async fn open_pull_requests(&self, head_prefix: &str) -> RemediationResult<Vec<PullRequest>> {
        Ok(self
            .open_pulls
            .lock()
            .unwrap()
            .iter()
            .filter(|pr| pr.head_ref.starts_with(head_prefix))
            .cloned()
            .collect())
    }
}

/// Registry that knows every tag except the ones marked missing.
pub struct FakeRegistry {
    missing: HashMap<String, Vec<String>>,
    pub lookups: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self {
            missing: HashMap::new(),
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Report `image` (as written in the manifest) missing, offering `suggestions`.
    pub fn missing(mut self, image: &str, suggestions: &[&str]) -> Self {
        self.missing.insert(
            image.to_string(),
            suggestions.iter().map(ToString::to_string).collect(),
        );
        self
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn lookup(&self, image: &ImageRef) -> ImageLookup {
        let key = image.to_string();
        self.lookups.lock().unwrap().push(key.clone());
        match self.missing.get(&key) {
            Some(suggestions) => ImageLookup::Missing {
                suggestions: suggestions.clone(),
            },
            None => ImageLookup::Found,
        }
    }
}

/// Notification channel that records every event.
pub struct RecordingChannel {
    pub events: Mutex<Vec<NotifyEvent>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            Err(ChannelError::Rejected {
                status: 500,
                body: "internal_error".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Wired orchestrator plus handles on its fakes.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub model: Arc<FakeModel>,
    pub vcs: Arc<FakeVcs>,
    pub images: Arc<FakeRegistry>,
    pub channel: Arc<RecordingChannel>,
}

impl Harness {
    pub fn new(model: FakeModel, vcs: FakeVcs, channel: RecordingChannel) -> Self {
        Self::with_config(&test_config(&[]), model, vcs, channel)
    }

    pub fn with_config(
        config: &Config,
        model: FakeModel,
        vcs: FakeVcs,
        channel: RecordingChannel,
    ) -> Self {
        Self::with_registry(config, model, vcs, FakeRegistry::new(), channel)
    }

    pub fn with_registry(
        config: &Config,
        model: FakeModel,
        vcs: FakeVcs,
        images: FakeRegistry,
        channel: RecordingChannel,
    ) -> Self {
        let model = Arc::new(model);
        let images = Arc::new(images);
        let vcs = Arc::new(vcs);
        let channel = Arc::new(channel);
        let registry = Arc::new(AttemptRegistry::new(
            config.attempt_retention,
            config.attempt_cooldown,
        ));
        let channels: Vec<Arc<dyn NotifyChannel>> = vec![channel.clone()];
        let orchestrator = Orchestrator::new(
            config,
            registry,
            model.clone(),
            images.clone(),
            vcs.clone(),
            Arc::new(Notifier::with_channels(channels)),
        )
        .unwrap();

        Self {
            orchestrator: Arc::new(orchestrator),
            model,
            vcs,
            images,
            channel,
        }
    }

    /// Submit every alert in a payload and wait for the spawned pipelines.
    pub async fn run_payload(&self, payload: &serde_json::Value) -> Vec<alert_bridge::Submission> {
        let mut submissions = Vec::new();
        for alert in alerts(payload) {
            submissions.push(self.orchestrator.submit(alert));
        }
        for submission in &mut submissions {
            if let Some(handle) = submission.handle.take() {
                handle.await.unwrap();
            }
        }
        submissions
    }
}
