//! Configuration for the alert bridge.
//!
//! All settings come from environment variables. Required values that are
//! missing, and numbers that do not parse, are fatal at startup.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::classifier::FailureMode;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Per-mode manifest locations in the GitOps repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPaths {
    paths: HashMap<FailureMode, String>,
}

impl ManifestPaths {
    /// Get the manifest path for a failure mode.
    #[must_use]
    pub fn path_for(&self, mode: FailureMode) -> &str {
        self.paths
            .get(&mode)
            .map_or_else(|| mode.default_manifest_path(), String::as_str)
    }

    /// Override the path for one mode.
    #[must_use]
    pub fn with_path(mut self, mode: FailureMode, path: impl Into<String>) -> Self {
        self.paths.insert(mode, path.into());
        self
    }
}

impl Default for ManifestPaths {
    fn default() -> Self {
        Self {
            paths: FailureMode::ALL
                .into_iter()
                .map(|mode| (mode, mode.default_manifest_path().to_string()))
                .collect(),
        }
    }
}

/// Retry budgets and backoff for the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Model generations per attempt.
    pub max_generation_attempts: u32,
    /// Publish tries per attempt.
    pub max_publish_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_generation_attempts: 3,
            max_publish_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Per-call timeouts for external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub llm: Duration,
    pub vcs: Duration,
    pub notify: Duration,
    /// Per image tag lookup.
    pub registry: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_secs(60),
            vcs: Duration::from_secs(30),
            notify: Duration::from_secs(10),
            registry: Duration::from_secs(10),
        }
    }
}

/// Alert bridge configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Ollama generate endpoint.
    pub ollama_url: String,
    /// Model name sent with every generate request.
    pub ollama_model: String,
    /// GitHub token (never logged).
    pub github_token: String,
    /// Target repository, `owner/repo`.
    pub github_repo: String,
    /// Base branch for remediation PRs.
    pub github_branch: String,
    /// GitHub REST API base URL.
    pub github_api_url: String,
    /// Slack incoming webhook URL (never logged).
    pub slack_webhook_url: String,
    /// Docker Hub API base URL for image tag lookups.
    pub image_registry_url: String,
    pub retry: RetrySettings,
    pub timeouts: Timeouts,
    /// Concurrent pipelines.
    pub worker_pool_size: usize,
    /// How long non-terminal attempts are kept before eviction.
    pub attempt_retention: Duration,
    /// How long terminal attempts suppress re-fired alerts.
    pub attempt_cooldown: Duration,
    /// Extra placeholder tokens rejected by the validator.
    pub placeholder_denylist: Vec<String>,
    pub manifest_paths: ManifestPaths,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let github_repo = required("GITHUB_REPO")?;
        if github_repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
            return Err(ConfigError::Invalid {
                name: "GITHUB_REPO",
                message: format!("expected owner/repo, got '{github_repo}'"),
            });
        }

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_generation_attempts: parse_at_least_one(
                &get,
                "MAX_GENERATION_ATTEMPTS",
                retry_defaults.max_generation_attempts,
            )?,
            max_publish_attempts: parse_at_least_one(
                &get,
                "MAX_PUBLISH_ATTEMPTS",
                retry_defaults.max_publish_attempts,
            )?,
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(parse_or(&get, "RETRY_MAX_DELAY_MS", 10_000)?),
        };

        let timeouts = Timeouts {
            llm: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 60)?),
            vcs: Duration::from_secs(parse_or(&get, "VCS_TIMEOUT_SECS", 30)?),
            notify: Duration::from_secs(parse_or(&get, "NOTIFY_TIMEOUT_SECS", 10)?),
            registry: Duration::from_secs(parse_or(&get, "REGISTRY_TIMEOUT_SECS", 10)?),
        };

        let mut manifest_paths = ManifestPaths::default();
        for mode in FailureMode::ALL {
            if let Some(path) = get(&format!("MANIFEST_PATH_{}", mode.env_suffix())) {
                manifest_paths = manifest_paths.with_path(mode, path);
            }
        }

        Ok(Self {
            port: parse_or(&get, "BRIDGE_PORT", 8080)?,
            ollama_url: required("OLLAMA_URL")?,
            ollama_model: get("OLLAMA_MODEL").unwrap_or_else(|| "llama3".to_string()),
            github_token: required("GITHUB_TOKEN")?,
            github_repo,
            github_branch: get("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
            github_api_url: get("GITHUB_API_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
            slack_webhook_url: required("SLACK_WEBHOOK_URL")?,
            image_registry_url: get("IMAGE_REGISTRY_URL")
                .unwrap_or_else(|| "https://hub.docker.com".to_string()),
            retry,
            timeouts,
            worker_pool_size: parse_at_least_one(&get, "WORKER_POOL_SIZE", 4)?,
            attempt_retention: Duration::from_secs(parse_or(&get, "ATTEMPT_RETENTION_SECS", 3600)?),
            attempt_cooldown: Duration::from_secs(parse_or(&get, "ATTEMPT_COOLDOWN_SECS", 900)?),
            placeholder_denylist: get("PLACEHOLDER_DENYLIST")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            manifest_paths,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("ollama_url", &self.ollama_url)
            .field("ollama_model", &self.ollama_model)
            .field("github_token", &"<redacted>")
            .field("github_repo", &self.github_repo)
            .field("github_branch", &self.github_branch)
            .field("github_api_url", &self.github_api_url)
            .field("slack_webhook_url", &"<redacted>")
            .field("image_registry_url", &self.image_registry_url)
            .field("retry", &self.retry)
            .field("timeouts", &self.timeouts)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("attempt_retention", &self.attempt_retention)
            .field("attempt_cooldown", &self.attempt_cooldown)
            .field("placeholder_denylist", &self.placeholder_denylist)
            .field("manifest_paths", &self.manifest_paths)
            .finish()
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_at_least_one<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, name, default)?;
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            name,
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
