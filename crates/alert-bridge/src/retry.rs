//! Stage retry budgets and backoff.

use std::time::Duration;

use crate::config::RetrySettings;

/// Retry policy for one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Tries allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for the model generation loop.
    #[must_use]
    pub const fn generation(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_generation_attempts,
            settings.base_delay,
            settings.max_delay,
        )
    }

    /// Policy for the publish loop.
    #[must_use]
    pub const fn publish(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_publish_attempts,
            settings.base_delay,
            settings.max_delay,
        )
    }

    /// Delay before retrying after the `failures`-th failure.
    ///
    /// `base * 2^(failures - 1)`, capped at `max_delay`. Zero failures means
    /// no delay.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Check whether another try is allowed after `tries` tries.
    #[must_use]
    pub const fn allows(&self, tries: u32) -> bool {
        tries < self.max_attempts
    }
}
