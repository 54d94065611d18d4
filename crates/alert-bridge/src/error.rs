//! Error taxonomy for the remediation pipeline.

use thiserror::Error;

use crate::validator::Rejection;

/// Errors raised by a pipeline stage.
///
/// Each stage owns its own retry budget; `is_retryable` tells the
/// orchestrator whether the stage's loop-back edge may be taken.
#[derive(Debug, Clone, Error)]
pub enum RemediationError {
    /// Inbound payload could not be turned into alerts
    #[error("Malformed alert payload: {0}")]
    AlertParse(String),

    /// Alert does not map to a known failure mode
    #[error("Unsupported failure mode: {0}")]
    UnsupportedFailureMode(String),

    /// Inference call timed out or the transport failed
    #[error("Model request failed: {0}")]
    LlmTimeout(String),

    /// Model answered, but the answer is not a usable patch
    #[error("Model response rejected: {0}")]
    LlmInvalidResponse(Rejection),

    /// Transport failure against the version-control host
    #[error("Git operation failed: {0}")]
    GitOperation(String),

    /// Version-control host answered with an error status
    #[error("GitHub API error {status}: {message}")]
    GitHubApi { status: u16, message: String },

    /// Notification delivery failed (never fatal)
    #[error("Slack notification failed: {0}")]
    SlackNotify(String),
}

/// Type alias for pipeline results.
pub type RemediationResult<T> = Result<T, RemediationError>;

impl RemediationError {
    /// Check if the error may be retried within its stage.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LlmTimeout(_)
                | Self::LlmInvalidResponse(_)
                | Self::GitOperation(_)
                | Self::GitHubApi { .. }
        )
    }

    /// Check if the host refused to create a ref because it already exists.
    #[must_use]
    pub fn is_existing_ref(&self) -> bool {
        matches!(
            self,
            Self::GitHubApi { status: 422, message } if message.contains("Reference already exists")
        )
    }

    /// Get error category as string.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::AlertParse(_) => "AlertParseError",
            Self::UnsupportedFailureMode(_) => "UnsupportedFailureMode",
            Self::LlmTimeout(_) => "LLMTimeoutError",
            Self::LlmInvalidResponse(_) => "LLMInvalidResponseError",
            Self::GitOperation(_) => "GitOperationError",
            Self::GitHubApi { .. } => "GitHubAPIError",
            Self::SlackNotify(_) => "SlackNotifyError",
        }
    }
}

impl From<notify::ChannelError> for RemediationError {
    fn from(err: notify::ChannelError) -> Self {
        Self::SlackNotify(err.to_string())
    }
}
