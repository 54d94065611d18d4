//! Model inference client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{RemediationError, RemediationResult};
use crate::validator::{Rejection, RejectionKind};

/// Text generation backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Get the backend name for logging.
    fn name(&self) -> &'static str;

    /// Generate a completion for `prompt`.
    ///
    /// Timeouts and transport failures are `LlmTimeout`; error statuses and
    /// undecodable bodies are `LlmInvalidResponse`.
    async fn generate(&self, prompt: &str) -> RemediationResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client posting to `url` with a per-request timeout.
    pub fn new(url: &str, model: &str, timeout: Duration) -> RemediationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemediationError::LlmTimeout(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
        })
    }

    /// Model name sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

fn unreadable(message: String) -> RemediationError {
    RemediationError::LlmInvalidResponse(Rejection::new(RejectionKind::Unreadable, message, ""))
}

#[async_trait]
impl InferenceClient for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> RemediationResult<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "Sending generate request");

        let response = self
            .client
            .post(&self.url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemediationError::LlmTimeout(format!("model request timed out: {e}"))
                } else {
                    RemediationError::LlmTimeout(format!("model request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unreadable(format!("model endpoint returned {status}: {body}")));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RemediationError::LlmTimeout(format!("model response timed out: {e}"))
            } else {
                unreadable(format!("failed to decode model response: {e}"))
            }
        })?;

        debug!(response_len = body.response.len(), "Model responded");
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_reads_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({"model": "llama3", "prompt": "fix it", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3",
                "response": "```yaml\nkind: Pod\n```",
                "done": true
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(
            &format!("{}/api/generate", server.uri()),
            "llama3",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.generate("fix it").await.unwrap(), "```yaml\nkind: Pod\n```");
    }

    #[tokio::test]
    async fn test_error_status_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri(), "llama3", Duration::from_secs(5)).unwrap();
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, RemediationError::LlmInvalidResponse(_)));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri(), "llama3", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.generate("x").await,
            Err(RemediationError::LlmInvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri(), "llama3", Duration::from_millis(50)).unwrap();
        assert!(matches!(
            client.generate("x").await,
            Err(RemediationError::LlmTimeout(_))
        ));
    }
}
