//! Retry and backoff policy.
//!
//! Transport-agnostic: the HTTP client uses [`RetryPolicy`] for its
//! server-error budget and the client facade uses it to pace gateway
//! reconnects.

use std::time::Duration;

use rand::Rng;

/// Policy controlling retry attempts and exponential backoff behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Exclusive upper bound of the random jitter added to each retry delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Server-error budget used by the REST client: five attempts, backing off
    /// `2^n` seconds plus up to one second of jitter.
    pub fn server_errors() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }

    /// A policy that never waits between attempts. Useful in tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Computes the delay to apply after the given failed attempt.
    ///
    /// `attempt` is 1-based; attempt 1 waits `initial_backoff`, attempt 2
    /// twice that, and so on up to `max_backoff`, plus random jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.base_delay_for_attempt(attempt) + jitter_duration(self.jitter)
    }

    fn base_delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = std::cmp::min(self.initial_backoff, self.max_backoff);
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::server_errors()
    }
}

fn jitter_duration(max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }
    max_jitter.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn server_error_backoff_doubles_from_one_second() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::server_errors()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(5));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_below_bound() {
        let policy = RetryPolicy::server_errors();
        for _ in 0..64 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2));
        }
    }
}
