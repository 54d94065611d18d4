//! Outcome notifications for alert remediation.
//!
//! Delivers [`NotifyEvent`]s (pull request opened, remediation failed) to
//! every configured [`NotifyChannel`]. The only shipped channel is
//! [`SlackChannel`], which posts attachments to an incoming webhook.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use notify::{Notifier, NotifyChannel, NotifyEvent, SlackChannel};
//!
//! # async fn example() {
//! let slack: Arc<dyn NotifyChannel> =
//!     Arc::new(SlackChannel::new("https://hooks.slack.com/services/T/B/X".to_string()));
//! let notifier = Notifier::with_channels(vec![slack]);
//!
//! let deliveries = notifier
//!     .deliver(&NotifyEvent::RemediationFailed {
//!         fingerprint: "3f2a9c0d1b7e4a55".to_string(),
//!         failure_mode: None,
//!         resource: "Pod/web-1".to_string(),
//!         namespace: "default".to_string(),
//!         alert_name: "KubePodCrashLooping".to_string(),
//!         stage: "classify".to_string(),
//!         reason: "no known failure symptom".to_string(),
//!         patch_preserved: false,
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await;
//! for delivery in deliveries {
//!     if let Err(e) = delivery.result {
//!         eprintln!("{} failed: {e}", delivery.channel);
//!     }
//! }
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{debug, warn};

/// Result of delivering one event to one channel.
#[derive(Debug)]
pub struct Delivery {
    pub channel: &'static str,
    pub result: Result<(), ChannelError>,
}

/// Dispatches events to a fixed set of channels.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    /// Create a notifier over the given channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// Number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.enabled()).count()
    }

    /// Deliver an event to every enabled channel and report each result.
    ///
    /// Delivery failures are returned, not raised: the caller decides
    /// whether a failed notification matters.
    pub async fn deliver(&self, event: &NotifyEvent) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(self.channels.len());

        for channel in self.channels.iter().filter(|c| c.enabled()) {
            let result = channel.send(event).await;
            match &result {
                Ok(()) => debug!(
                    channel = channel.name(),
                    fingerprint = %event.fingerprint(),
                    "Notification delivered"
                ),
                Err(e) => warn!(
                    channel = channel.name(),
                    fingerprint = %event.fingerprint(),
                    error = %e,
                    "Notification not delivered"
                ),
            }
            deliveries.push(Delivery {
                channel: channel.name(),
                result,
            });
        }

        if deliveries.is_empty() {
            debug!(fingerprint = %event.fingerprint(), "No enabled notification channels");
        }
        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: AtomicUsize,
        enabled: bool,
        fail: bool,
    }

    impl CountingChannel {
        fn new(enabled: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                enabled,
                fail,
            })
        }
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, _event: &NotifyEvent) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
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

    fn failed_event() -> NotifyEvent {
        NotifyEvent::RemediationFailed {
            fingerprint: "abc".to_string(),
            failure_mode: None,
            resource: "Pod/web-1".to_string(),
            namespace: "default".to_string(),
            alert_name: "KubePodNotReady".to_string(),
            stage: "classify".to_string(),
            reason: "unsupported".to_string(),
            patch_preserved: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_event_titles_and_severity() {
        let event = failed_event();
        assert_eq!(event.title(), "Unsupported alert for Pod/web-1");
        assert_eq!(event.severity(), Severity::Warning);
        assert_eq!(event.fingerprint(), "abc");
    }

    #[tokio::test]
    async fn test_deliver_collects_results() {
        let ok = CountingChannel::new(true, false);
        let bad = CountingChannel::new(true, true);
        let notifier = Notifier::with_channels(vec![ok.clone(), bad.clone()]);

        let deliveries = notifier.deliver(&failed_event()).await;
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries[0].result.is_ok());
        assert!(matches!(
            deliveries[1].result,
            Err(ChannelError::Rejected { status: 500, .. })
        ));
        assert_eq!(ok.sent.load(Ordering::SeqCst), 1);
        assert_eq!(bad.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let off = CountingChannel::new(false, false);
        let notifier = Notifier::with_channels(vec![off.clone()]);

        assert_eq!(notifier.channel_count(), 0);
        assert!(notifier.deliver(&failed_event()).await.is_empty());
        assert_eq!(off.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_notifier_delivers_nothing() {
        assert!(Notifier::default().deliver(&failed_event()).await.is_empty());
    }
}
