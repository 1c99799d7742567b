//! The pluggable card producer consumed by the pool.
//!
//! A [`CardSource`] is chosen once at startup (LLM or CSV) and handed to the
//! pool as `Arc<dyn CardSource>`; the pool never branches on which variant it
//! holds. Sources report failures as [`SourceError`], classified as either
//! retryable or permanent, and advertise how often a failed call may be
//! retried through [`RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;

use crate::card_engine::models::RawCardCandidate;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("source call timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("malformed source response: {0}")]
    Malformed(String),

    #[error("source returned no usable cards")]
    Empty,

    /// The source can never produce another card (e.g. CSV rows ran out).
    #[error("source exhausted: {0}")]
    Exhausted(String),
}

impl SourceError {
    /// Permanent errors are never retried and mark the source unavailable.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SourceError::Exhausted(_))
    }
}

/// Bounded retry with exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls per refill cycle, first attempt included. Always >= 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Producer of raw card candidates.
#[async_trait]
pub trait CardSource: Send + Sync {
    /// Produce up to `count` candidates. `count` is always >= 1.
    async fn produce_batch(&self, count: usize) -> Result<Vec<RawCardCandidate>, SourceError>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(2));
        assert_eq!(p.backoff(4), Duration::from_secs(3));
        assert_eq!(p.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn zero_attempts_still_means_one_call() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn only_exhaustion_is_permanent() {
        assert!(SourceError::Exhausted("csv".into()).is_permanent());
        assert!(!SourceError::Empty.is_permanent());
        assert!(!SourceError::Timeout(Duration::from_secs(1)).is_permanent());
    }
}
