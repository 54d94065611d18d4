//! Version-control seam and its GitHub REST implementation.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{RemediationError, RemediationResult};

/// A file read from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: String,
    /// Decoded file content
    pub content: String,
    /// Blob sha, required to update the file
    pub sha: String,
}

/// A file update committed onto a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    pub path: String,
    pub branch: String,
    pub message: String,
    pub content: String,
    /// Blob sha of the version being replaced
    pub blob_sha: String,
}

/// A pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// A pull request as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head_ref: String,
    pub head_sha: String,
    #[serde(skip)]
    pub body: Option<String>,
}

/// Operations the publisher needs from a version-control host.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Read a file at a branch.
    async fn get_file(&self, path: &str, branch: &str) -> RemediationResult<ManifestFile>;

    /// Get the head commit sha of a branch.
    async fn branch_head(&self, branch: &str) -> RemediationResult<String>;

    /// Create a branch pointing at `sha`.
    async fn create_branch(&self, branch: &str, sha: &str) -> RemediationResult<()>;

    /// Commit a file update; returns the new commit sha.
    async fn commit_file(&self, commit: &FileCommit) -> RemediationResult<String>;

    /// Open a pull request.
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> RemediationResult<PullRequest>;

    /// Open pull requests whose head branch starts with `head_prefix`.
    async fn open_pull_requests(&self, head_prefix: &str) -> RemediationResult<Vec<PullRequest>>;
}

// GitHub wire types

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateContentRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpdateContentResponse {
    commit: RefObject,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    head: PullHead,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

impl From<PullResponse> for PullRequest {
    fn from(pr: PullResponse) -> Self {
        Self {
            number: pr.number,
            url: pr.html_url,
            head_ref: pr.head.git_ref,
            head_sha: pr.head.sha,
            body: pr.body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// GitHub REST client scoped to one repository.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    token: String,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a new GitHub client for `owner/repo`.
    pub fn new(api_url: &str, repo: &str, token: &str) -> RemediationResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("alert-bridge/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RemediationError::GitOperation(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{path}", self.api_url, self.repo)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Turn a non-2xx response into `GitHubApi`, passing successes through.
    async fn check(response: Response) -> RemediationResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(RemediationError::GitHubApi {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> RemediationResult<T> {
        response
            .json()
            .await
            .map_err(|e| RemediationError::GitOperation(format!("failed to parse {what} response: {e}")))
    }
}

fn transport(what: &str) -> impl FnOnce(reqwest::Error) -> RemediationError + '_ {
    move |e| RemediationError::GitOperation(format!("{what} request failed: {e}"))
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_file(&self, path: &str, branch: &str) -> RemediationResult<ManifestFile> {
        debug!(repo = %self.repo, path, branch, "Fetching manifest");

        let response = self
            .client
            .get(self.url(&format!("contents/{path}")))
            .query(&[("ref", branch)])
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(transport("get contents"))?;

        let body: ContentResponse = Self::decode(Self::check(response).await?, "contents").await?;
        if body.encoding != "base64" {
            return Err(RemediationError::GitOperation(format!(
                "unsupported content encoding '{}' for {path}",
                body.encoding
            )));
        }

        let packed: String = body.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .map_err(|e| RemediationError::GitOperation(format!("invalid base64 in {path}: {e}")))?;
        let content = String::from_utf8(bytes)
            .map_err(|e| RemediationError::GitOperation(format!("{path} is not UTF-8: {e}")))?;

        Ok(ManifestFile {
            path: path.to_string(),
            content,
            sha: body.sha,
        })
    }

    async fn branch_head(&self, branch: &str) -> RemediationResult<String> {
        let response = self
            .client
            .get(self.url(&format!("git/ref/heads/{branch}")))
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(transport("get ref"))?;

        let body: RefResponse = Self::decode(Self::check(response).await?, "ref").await?;
        Ok(body.object.sha)
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> RemediationResult<()> {
        debug!(repo = %self.repo, branch, sha, "Creating branch");

        let response = self
            .client
            .post(self.url("git/refs"))
            .header(AUTHORIZATION, self.auth())
            .json(&CreateRefRequest {
                git_ref: format!("refs/heads/{branch}"),
                sha,
            })
            .send()
            .await
            .map_err(transport("create ref"))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn commit_file(&self, commit: &FileCommit) -> RemediationResult<String> {
        debug!(repo = %self.repo, path = %commit.path, branch = %commit.branch, "Committing file");

        let response = self
            .client
            .put(self.url(&format!("contents/{}", commit.path)))
            .header(AUTHORIZATION, self.auth())
            .json(&UpdateContentRequest {
                message: &commit.message,
                content: base64::engine::general_purpose::STANDARD.encode(&commit.content),
                sha: &commit.blob_sha,
                branch: &commit.branch,
            })
            .send()
            .await
            .map_err(transport("update contents"))?;

        let body: UpdateContentResponse =
            Self::decode(Self::check(response).await?, "contents update").await?;
        Ok(body.commit.sha)
    }

    async fn open_pull_request(&self, draft: &PullRequestDraft) -> RemediationResult<PullRequest> {
        debug!(repo = %self.repo, head = %draft.head, base = %draft.base, "Opening pull request");

        let response = self
            .client
            .post(self.url("pulls"))
            .header(AUTHORIZATION, self.auth())
            .json(&CreatePullRequest {
                title: &draft.title,
                head: &draft.head,
                base: &draft.base,
                body: &draft.body,
            })
            .send()
            .await
            .map_err(transport("create pull request"))?;

        let pr: PullResponse = Self::decode(Self::check(response).await?, "pull request").await?;
        Ok(pr.into())
    }

    async fn open_pull_requests(&self, head_prefix: &str) -> RemediationResult<Vec<PullRequest>> {
        let response = self
            .client
            .get(self.url("pulls"))
            .query(&[("state", "open"), ("per_page", "100")])
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(transport("list pull requests"))?;

        let pulls: Vec<PullResponse> =
            Self::decode(Self::check(response).await?, "pull request list").await?;
        Ok(pulls
            .into_iter()
            .filter(|pr| pr.head.git_ref.starts_with(head_prefix))
            .map(PullRequest::from)
            .collect())
    }
}
