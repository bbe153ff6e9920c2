//! Retry backoff and cancellation classification

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Phrases the CLI and users produce when work was stopped on purpose
const CANCELLATION_PHRASES: &[&str] = &[
    "cancelled by user",
    "canceled by user",
    "user cancelled",
    "user canceled",
    "interrupted by user",
    "aborted by user",
    "user aborted",
    "stopped by user",
    "user stopped",
    "request interrupted",
];

/// Exponential backoff for failed sub-tasks
///
/// Shared by value; never mutated during a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// `0` disables retries entirely
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    ///
    /// `retry_delay * backoff_multiplier^attempt`. Never negative: a negative
    /// or NaN result collapses to zero, an overflowing one saturates.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.retry_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Whether an item that has already been retried `retry_count` times may go again
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Case-insensitive check for a deliberate user cancellation
pub fn is_user_cancellation(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    CANCELLATION_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_monotonic_for_multiplier_at_least_one() {
        for multiplier in [1.0, 1.5, 2.0, 3.0] {
            let policy = RetryPolicy {
                backoff_multiplier: multiplier,
                ..RetryPolicy::default()
            };
            for attempt in 0..20 {
                assert!(policy.delay(attempt + 1) >= policy.delay(attempt));
                assert_eq!(policy.delay(attempt), policy.delay(attempt));
            }
        }
    }

    #[test]
    fn delay_never_negative() {
        let policy = RetryPolicy {
            backoff_multiplier: -3.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert!(policy.delay(2) > Duration::ZERO);
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn zero_max_retries_disables_retry() {
        let policy = RetryPolicy::none();
        assert!(!policy.allows_retry(0));

        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    #[test]
    fn cancellation_phrases_match_case_insensitively() {
        assert!(is_user_cancellation("Task Cancelled By User"));
        assert!(is_user_cancellation("[Request interrupted by user for tool use]"));
        assert!(is_user_cancellation("ABORTED BY USER"));
        assert!(!is_user_cancellation("process exited with code 1"));
        assert!(!is_user_cancellation(""));
    }

    #[test]
    fn policy_parses_humantime_delay() {
        let policy: RetryPolicy =
            toml::from_str("max_retries = 5\nretry_delay = \"500ms\"").unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.retry_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }
}
