//! Bounded retry policy shared by both backends.

use std::time::Duration;

use crate::error::Error;

/// Whether a failure is worth another attempt.
pub trait Classify {
    /// True for transient failures.
    fn is_retryable(&self) -> bool;
}

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Retrying an outage would only double the time the poll loop
            // is blocked on connect/read timeouts.
            Self::Connectivity(_) => false,
            Self::Api { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Automation(e) => e.is_retryable(),
            Self::Auth(_) | Self::Config(_) | Self::Io(_) | Self::Serde(_) => false,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry(Duration),
    /// Stop and report the failure.
    GiveUp,
}

/// Maximum attempts and a linear backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; later attempts scale linearly.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Local automation: two attempts, reconnecting in between.
    pub const LOCAL: Self = Self {
        max_attempts: 2,
        backoff: Duration::ZERO,
    };

    /// Remote API: two attempts for throttling and gateway errors.
    pub const REMOTE: Self = Self {
        max_attempts: 2,
        backoff: Duration::from_millis(500),
    };

    /// Never retry.
    pub const NONE: Self = Self {
        max_attempts: 1,
        backoff: Duration::ZERO,
    };

    /// Decides what to do after `attempt` (1-based) failed with `err`.
    #[must_use]
    pub fn decide(&self, attempt: u32, err: &impl Classify) -> RetryDecision {
        if attempt >= self.max_attempts.max(1) || !err.is_retryable() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff.saturating_mul(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::LOCAL
    }
}
