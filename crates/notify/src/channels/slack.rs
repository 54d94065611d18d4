//! Slack webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Default request timeout for webhook posts.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack incoming-webhook channel.
///
/// The webhook URL embeds its credential, so it is never logged.
pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self::with_timeout(webhook_url, DEFAULT_TIMEOUT)
    }

    /// Create a Slack channel with a specific webhook URL and request timeout.
    #[must_use]
    pub fn with_timeout(webhook_url: String, timeout: Duration) -> Self {
        Self {
            webhook_url,
            client: build_client(timeout),
        }
    }

    /// Format an event as a Slack webhook payload.
    fn format_payload(event: &NotifyEvent) -> SlackPayload {
        let fields = Self::format_fields(event)
            .into_iter()
            .map(|(title, value)| SlackField {
                title,
                value,
                short: true,
            })
            .collect();

        let attachment = SlackAttachment {
            fallback: event.title(),
            color: event.severity().color().to_string(),
            author_name: Some("Alert Bridge".to_string()),
            title: event.title(),
            text: Self::format_description(event),
            fields,
            footer: Some(format!(
                "{} | {}",
                event.severity().as_str(),
                event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(event.timestamp().timestamp()),
        };

        SlackPayload {
            text: event.title(),
            attachments: vec![attachment],
        }
    }

    /// Format the description for an event.
    fn format_description(event: &NotifyEvent) -> String {
        match event {
            NotifyEvent::RemediationOpened {
                pr_url,
                pr_number,
                summary,
                ..
            } => {
                format!("🔧 Auto-fix PR <{pr_url}|#{pr_number}> ready to review & merge\n{summary}")
            }

            NotifyEvent::RemediationFailed {
                stage,
                reason,
                patch_preserved,
                ..
            } => {
                let follow_up = if *patch_preserved {
                    "A validated patch is kept for manual follow-up."
                } else {
                    "Manual investigation required."
                };
                format!("❌ Failed during *{stage}*: {reason}\n{follow_up}")
            }
        }
    }

    /// Format additional fields for an event.
    fn format_fields(event: &NotifyEvent) -> Vec<(String, String)> {
        match event {
            NotifyEvent::RemediationOpened {
                alert_name,
                resource,
                namespace,
                branch,
                fingerprint,
                ..
            } => vec![
                ("Alert".to_string(), alert_name.clone()),
                ("Resource".to_string(), format!("{namespace}/{resource}")),
                ("Branch".to_string(), format!("`{branch}`")),
                ("Fingerprint".to_string(), fingerprint.clone()),
            ],

            NotifyEvent::RemediationFailed {
                alert_name,
                resource,
                namespace,
                failure_mode,
                fingerprint,
                ..
            } => vec![
                ("Alert".to_string(), alert_name.clone()),
                ("Resource".to_string(), format!("{namespace}/{resource}")),
                (
                    "Failure Mode".to_string(),
                    failure_mode.clone().unwrap_or_else(|| "unsupported".to_string()),
                ),
                ("Fingerprint".to_string(), fingerprint.clone()),
            ],
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        if self.webhook_url.is_empty() {
            return Err(ChannelError::NotConfigured("slack webhook url".to_string()));
        }

        let payload = Self::format_payload(event);

        debug!(channel = "slack", fingerprint = %event.fingerprint(), "Sending notification");

        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ChannelError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();

        warn!(
            channel = "slack",
            status = %status,
            body = %body,
            "Slack webhook request failed"
        );

        Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
