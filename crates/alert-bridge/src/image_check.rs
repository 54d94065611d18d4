//! Best-effort registry lookup for container image tags.
//!
//! Image pull fixes are checked against Docker Hub before they are published.
//! A tag the registry reports missing becomes an `unknown_image` rejection
//! carrying a few tags that do exist. Anything the registry cannot answer
//! (other registries, digests, timeouts, error statuses) passes.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::manifest;
use crate::validator::{Patch, Rejection, RejectionKind};

/// Tags always worth offering when the requested one is missing.
const COMMON_TAGS: &[&str] = &["latest", "alpine", "slim"];

const MAX_SUGGESTIONS: usize = 3;

/// A Docker Hub image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Hub repository, `library/` prefixed for official images
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Parse an image hosted on Docker Hub.
    ///
    /// Returns `None` for digests, untagged images and images whose first
    /// path segment names another registry host.
    #[must_use]
    pub fn docker_hub(image: &str) -> Option<Self> {
        if image.contains('@') {
            return None;
        }
        let image = image
            .strip_prefix("docker.io/")
            .or_else(|| image.strip_prefix("index.docker.io/"))
            .unwrap_or(image);

        let (name, tag) = image.rsplit_once(':')?;
        if name.is_empty() || tag.is_empty() || tag.contains('/') {
            return None;
        }

        let repository = match name.split_once('/') {
            Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                return None;
            }
            Some(_) => name.to_string(),
            None => format!("library/{name}"),
        };

        Some(Self {
            repository,
            tag: tag.to_string(),
        })
    }

    fn short_name(&self) -> &str {
        self.repository
            .strip_prefix("library/")
            .unwrap_or(&self.repository)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.short_name(), self.tag)
    }
}

/// Result of asking a registry about one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLookup {
    Found,
    /// The registry says the tag does not exist
    Missing { suggestions: Vec<String> },
    /// No answer; the image is let through
    Inconclusive(String),
}

/// Container image registry.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Get the registry name for logging.
    fn name(&self) -> &'static str;

    /// Look up one tag.
    async fn lookup(&self, image: &ImageRef) -> ImageLookup;
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    results: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Client for the Docker Hub repositories API.
#[derive(Debug, Clone)]
pub struct DockerHubClient {
    client: reqwest::Client,
    base_url: String,
}

impl DockerHubClient {
    /// Create a client against `base_url` (normally `https://hub.docker.com`).
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("alert-bridge/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn tags_url(&self, repository: &str) -> String {
        format!("{}/v2/repositories/{repository}/tags", self.base_url)
    }

    async fn suggestions(&self, image: &ImageRef) -> Vec<String> {
        let page = async {
            self.client
                .get(self.tags_url(&image.repository))
                .query(&[("page_size", "100")])
                .send()
                .await?
                .error_for_status()?
                .json::<TagPage>()
                .await
        };

        match page.await {
            Ok(page) => {
                let names: Vec<String> = page.results.into_iter().map(|t| t.name).collect();
                suggest_tags(&image.tag, &names)
            }
            Err(e) => {
                debug!(image = %image, error = %e, "Tag listing unavailable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ImageRegistry for DockerHubClient {
    fn name(&self) -> &'static str {
        "docker-hub"
    }

    async fn lookup(&self, image: &ImageRef) -> ImageLookup {
        let url = format!("{}/{}", self.tags_url(&image.repository), image.tag);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return ImageLookup::Inconclusive(format!("registry request failed: {e}")),
        };

        match response.status() {
            status if status.is_success() => ImageLookup::Found,
            StatusCode::NOT_FOUND => ImageLookup::Missing {
                suggestions: self.suggestions(image).await,
            },
            status => ImageLookup::Inconclusive(format!("registry returned {status}")),
        }
    }
}

/// Pick up to three existing tags to offer instead of `requested`.
///
/// Tags containing the requested one come first, then tags sharing its
/// major version, then the common floating tags.
#[must_use]
pub fn suggest_tags(requested: &str, available: &[String]) -> Vec<String> {
    let wanted = requested.to_lowercase();
    let major = wanted
        .split('.')
        .next()
        .filter(|m| !m.is_empty() && m.chars().all(|c| c.is_ascii_digit()))
        .map(|m| format!("{m}."));

    let contains = available.iter().filter(|t| t.to_lowercase().contains(&wanted));
    let same_major = available
        .iter()
        .filter(|t| major.as_ref().is_some_and(|m| t.starts_with(m.as_str())));
    let common = available.iter().filter(|t| COMMON_TAGS.contains(&t.as_str()));

    let mut picked: Vec<String> = Vec::new();
    for tag in contains.chain(same_major).chain(common) {
        if !picked.contains(tag) {
            picked.push(tag.clone());
        }
        if picked.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    picked
}

/// Check every Docker Hub image in a validated patch.
///
/// Each lookup runs under `timeout`. Missing tags reject the patch; lookups
/// that time out or fail are logged and let through.
pub async fn verify_images(
    registry: &dyn ImageRegistry,
    mut patch: Patch,
    timeout: Duration,
) -> Result<Patch, Rejection> {
    let images: Vec<ImageRef> = serde_yaml::from_str::<Value>(&patch.document)
        .map(|document| {
            manifest::containers(&document)
                .into_iter()
                .filter_map(|c| c.get("image").and_then(Value::as_str).and_then(ImageRef::docker_hub))
                .collect()
        })
        .unwrap_or_default();

    let mut verified = !images.is_empty();
    for image in &images {
        let lookup = tokio::time::timeout(timeout, registry.lookup(image))
            .await
            .unwrap_or_else(|_| {
                ImageLookup::Inconclusive(format!("no answer within {}s", timeout.as_secs()))
            });

        match lookup {
            ImageLookup::Found => debug!(image = %image, registry = registry.name(), "Image tag exists"),
            ImageLookup::Missing { suggestions } => {
                let mut message = format!("tag '{}' not found for {}", image.tag, image.short_name());
                if !suggestions.is_empty() {
                    message.push_str(&format!(", try: {}", suggestions.join(", ")));
                }
                return Err(Rejection::new(
                    RejectionKind::UnknownImage,
                    message,
                    patch.document.trim(),
                ));
            }
            ImageLookup::Inconclusive(reason) => {
                warn!(image = %image, registry = registry.name(), reason = %reason, "Image lookup inconclusive, allowing");
                verified = false;
            }
        }
    }

    if verified {
        patch.verdict.push("image_exists");
    }
    Ok(patch)
}
