//! Retry policy for failed delivery attempts.
//!
//! The default policy makes a single attempt. When more attempts are
//! configured, transport failures and 5xx, 408 or 429 responses are retried
//! within the same dispatch after a backoff delay. Other responses, 4xx in
//! particular, are final: the subscriber answered and repeating the request
//! would get the same answer.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Exponential backoff with `max_attempts` total attempts.
    pub fn exponential(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Returns true if more than one attempt may be made.
    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: delay doubles each attempt.
    Exponential,
    /// Linear backoff: delay increases by base amount each attempt.
    Linear,
}

/// Why an attempt did not deliver.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// No response was obtained.
    Transport(DeliveryError),
    /// The subscriber answered with a non-2xx status.
    Response {
        /// HTTP status code returned
        status_code: u16,
        /// Parsed `Retry-After` header, if any
        retry_after_seconds: Option<u64>,
    },
}

impl AttemptFailure {
    /// Returns true if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_retryable(),
            Self::Response { status_code, .. } => is_retryable_status(*status_code),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Response { retry_after_seconds: Some(seconds), .. } => {
                Some(Duration::from_secs(*seconds))
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(error) => write!(f, "{error}"),
            Self::Response { status_code, .. } => write!(f, "HTTP {status_code}"),
        }
    }
}

/// Status codes that signal a temporary condition on the subscriber side.
pub fn is_retryable_status(status_code: u16) -> bool {
    matches!(status_code, 408 | 429 | 500..=599)
}

/// Retry decision context for a failed delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Current attempt number (1-based).
    pub attempt_number: u32,
    /// Failure of that attempt.
    pub failure: &'a AttemptFailure,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery after waiting.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Do not retry - the last outcome is final.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed attempt.
    pub fn new(attempt_number: u32, failure: &'a AttemptFailure, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, failure, policy }
    }

    /// Determines if and when to retry based on the failure context.
    ///
    /// A `Retry-After` header on a retryable response takes precedence over
    /// the backoff schedule, capped at the policy's maximum delay.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) reached", self.policy.max_attempts),
            };
        }

        if !self.failure.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable failure: {}", self.failure),
            };
        }

        RetryDecision::Retry { delay: self.calculate_delay() }
    }

    fn calculate_delay(&self) -> Duration {
        if let Some(retry_after) = self.failure.retry_after() {
            return retry_after.min(self.policy.max_delay);
        }

        let base_delay = match self.policy.backoff_strategy {
            BackoffStrategy::Fixed => self.policy.base_delay,
            BackoffStrategy::Linear => self.policy.base_delay * self.attempt_number,
            BackoffStrategy::Exponential => {
                let exponent = self.attempt_number.saturating_sub(1).min(20);
                self.policy.base_delay * 2_u32.saturating_pow(exponent)
            },
        };

        let capped_delay = base_delay.min(self.policy.max_delay);
        apply_jitter(capped_delay, self.policy.jitter_factor).min(self.policy.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor`.
///
/// With `jitter_factor = 0.25` a 10s delay becomes anything from 7.5s to
/// 12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: strategy,
        }
    }

    fn delays(policy: &RetryPolicy, failure: &AttemptFailure, attempts: u32) -> Vec<Duration> {
        (1..=attempts)
            .map(|attempt| match RetryContext::new(attempt, failure, policy).decide_retry() {
                RetryDecision::Retry { delay } => delay,
                RetryDecision::GiveUp { reason } => panic!("gave up at {attempt}: {reason}"),
            })
            .collect()
    }

    #[test]
    fn default_policy_makes_one_attempt() {
        let policy = RetryPolicy::default();
        assert!(!policy.retries_enabled());

        let failure = AttemptFailure::Transport(DeliveryError::timeout(Duration::from_secs(30)));
        match RetryContext::new(1, &failure, &policy).decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => panic!("default policy must not retry"),
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let failure = AttemptFailure::Transport(DeliveryError::network("refused"));
        let delays = delays(&no_jitter(BackoffStrategy::Exponential), &failure, 5);
        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let failure = AttemptFailure::Response { status_code: 503, retry_after_seconds: None };
        assert_eq!(
            delays(&no_jitter(BackoffStrategy::Linear), &failure, 3),
            [1, 2, 3].map(Duration::from_secs)
        );
        assert_eq!(
            delays(&no_jitter(BackoffStrategy::Fixed), &failure, 3),
            [1, 1, 1].map(Duration::from_secs)
        );
    }

    #[test]
    fn max_delay_enforced() {
        let failure = AttemptFailure::Transport(DeliveryError::timeout(Duration::from_secs(30)));
        let policy = no_jitter(BackoffStrategy::Exponential);
        let delay = delays(&policy, &failure, 9)[8];
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn client_errors_are_final() {
        let policy = RetryPolicy::exponential(5);
        for status_code in [400, 401, 403, 404, 410, 422] {
            let failure = AttemptFailure::Response { status_code, retry_after_seconds: None };
            assert!(matches!(
                RetryContext::new(1, &failure, &policy).decide_retry(),
                RetryDecision::GiveUp { .. }
            ));
        }
    }

    #[test]
    fn configuration_errors_are_final() {
        let policy = RetryPolicy::exponential(5);
        let failure = AttemptFailure::Transport(DeliveryError::configuration("bad header"));
        match RetryContext::new(1, &failure, &policy).decide_retry() {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            RetryDecision::Retry { .. } => panic!("configuration errors must not retry"),
        }
    }

    #[test]
    fn retry_after_header_respected_and_capped() {
        let policy = no_jitter(BackoffStrategy::Exponential);

        let failure = AttemptFailure::Response { status_code: 429, retry_after_seconds: Some(5) };
        assert_eq!(delays(&policy, &failure, 1), [Duration::from_secs(5)]);

        let failure = AttemptFailure::Response { status_code: 429, retry_after_seconds: Some(3600) };
        assert_eq!(delays(&policy, &failure, 1), [Duration::from_secs(60)]);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(302));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base_delay = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base_delay, 0.5);
            assert!(jittered >= Duration::from_secs(5), "delay too small: {jittered:?}");
            assert!(jittered <= Duration::from_secs(15), "delay too large: {jittered:?}");
            seen.insert(jittered.as_millis());
        }

        assert!(seen.len() > 1, "jitter should create variation");
    }
}
