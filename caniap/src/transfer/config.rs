//! Timing and retry tuning for a transfer.

use std::time::Duration;

/// Delay curve between attempts of a rejected page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay after the first rejection.
    pub initial: Duration,
    /// Growth factor per further rejection of the same page.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        // The device erases the rejected page before it accepts new data
        Self {
            initial: Duration::from_secs(2),
            multiplier: 1.0,
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// No delay at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            initial: Duration::ZERO,
            multiplier: 1.0,
            max: Duration::ZERO,
        }
    }

    /// Delay before retrying after the `attempt`-th consecutive rejection (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(0.0).powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// What to do when a page keeps failing CRC verification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetryPolicy {
    /// Retries allowed per page; `None` retries forever.
    pub max_page_retries: Option<u32>,
    /// Pause before each retransmission.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Retry every page forever with the default backoff.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up on a page after `retries` retransmissions.
    #[must_use]
    pub fn limited(retries: u32) -> Self {
        Self {
            max_page_retries: Some(retries),
            ..Self::default()
        }
    }

    /// Set the backoff curve.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether `failures` rejections of the same page exceed the ceiling.
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_page_retries
            .is_some_and(|max| failures > max)
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Minimum spacing between consecutive messages.
    pub min_interval: Duration,
    /// Pause after the device confirms the erase.
    pub erase_settle: Duration,
    /// Pause after the last-frame marker.
    pub last_frame_settle: Duration,
    /// Timeout for each request/response exchange.
    pub response_timeout: Duration,
    /// Page retry policy.
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            erase_settle: Duration::from_secs(2),
            last_frame_settle: Duration::from_millis(100),
            response_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    /// Set the minimum spacing between messages.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the pause after the erase handshake.
    #[must_use]
    pub fn with_erase_settle(mut self, settle: Duration) -> Self {
        self.erase_settle = settle;
        self
    }

    /// Set the pause after the last-frame marker.
    #[must_use]
    pub fn with_last_frame_settle(mut self, settle: Duration) -> Self {
        self.last_frame_settle = settle;
        self
    }

    /// Set the per-request response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the page retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// No pacing, settling or backoff. Only useful against simulated targets.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            min_interval: Duration::ZERO,
            erase_settle: Duration::ZERO,
            last_frame_settle: Duration::ZERO,
            response_timeout: Duration::from_millis(100),
            retry: RetryPolicy::default().with_backoff(Backoff::none()),
        }
    }
}
