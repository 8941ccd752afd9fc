//! Explicit retry policy
//!
//! A synchronous retry loop around any fallible call: a stop condition
//! (attempt count and/or wall-clock deadline), a randomized exponential
//! backoff, and a caller-supplied predicate deciding which errors are worth
//! another attempt.

use rand::Rng;
use std::time::{Duration, Instant};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Stop after this many attempts (None = unbounded)
    pub max_attempts: Option<u32>,
    /// Stop once this much time has elapsed (None = unbounded)
    pub deadline: Option<Duration>,
    /// Backoff multiplier
    pub base_delay: Duration,
    /// Upper bound on a single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

/// A policy gave up; carries the last error
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts made
    pub attempts: u32,
    /// Time spent across all attempts
    pub elapsed: Duration,
    /// Last error returned by the operation
    pub last: E,
}

impl RetryPolicy {
    /// Policy for code-generation calls: random exponential wait capped at
    /// two minutes, giving up after fifteen minutes
    #[must_use]
    pub fn network() -> Self {
        Self {
            max_attempts: None,
            deadline: Some(Duration::from_secs(900)),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub fn none() -> Self {
        Self::attempts(1)
    }

    /// Up to `n` attempts without waiting in between
    #[must_use]
    pub fn attempts(n: u32) -> Self {
        Self {
            max_attempts: Some(n.max(1)),
            deadline: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Replace the deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the backoff bounds
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Upper bound of the wait after the `attempt`-th failure (1-based)
    #[must_use]
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Randomized wait after the `attempt`-th failure
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rng.gen_range(0.0..=ceiling.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// policy stops. The closure receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] holding the last error.
    pub fn run<T, E, F, P>(&self, mut op: F, retryable: P) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut rng = rand::thread_rng();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempt >= max);
            let wait = self.delay_for(attempt, &mut rng);
            let past_deadline = self
                .deadline
                .is_some_and(|deadline| start.elapsed() + wait >= deadline);
            if !retryable(&err) || out_of_attempts || past_deadline {
                return Err(Exhausted {
                    attempts: attempt,
                    elapsed: start.elapsed(),
                    last: err,
                });
            }
            tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying");
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::attempts(5);
        let result: Result<u32, Exhausted<String>> = policy.run(
            |n| if n < 3 { Err(format!("fail {n}")) } else { Ok(n) },
            |_| true,
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_stops_at_max_attempts() {
        let policy = RetryPolicy::attempts(4);
        let mut calls = 0;
        let result: Result<(), Exhausted<String>> = policy.run(
            |_| {
                calls += 1;
                Err("always".to_string())
            },
            |_| true,
        );
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(calls, 4);
        assert_eq!(exhausted.last, "always");
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::attempts(10);
        let result: Result<(), Exhausted<String>> =
            policy.run(|_| Err("fatal".to_string()), |e| e != "fatal");
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[test]
    fn test_deadline_stops_unbounded_policy() {
        let policy = RetryPolicy {
            max_attempts: None,
            deadline: Some(Duration::ZERO),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        let result: Result<(), Exhausted<String>> = policy.run(|_| Err("x".to_string()), |_| true);
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[test]
    fn test_backoff_ceiling_is_capped() {
        let policy = RetryPolicy::network();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_ceiling(10), Duration::from_secs(120));
        assert_eq!(policy.backoff_ceiling(64), Duration::from_secs(120));
    }

    #[test]
    fn test_delay_within_ceiling() {
        let policy = RetryPolicy::network();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..8 {
            let delay = policy.delay_for(attempt, &mut rng);
            assert!(delay <= policy.backoff_ceiling(attempt));
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_ceiling_monotone_and_capped(base_ms in 1u64..5_000, cap_s in 1u64..600, attempt in 0u32..64) {
            let policy = RetryPolicy::attempts(3)
                .with_backoff(Duration::from_millis(base_ms), Duration::from_secs(cap_s));
            let here = policy.backoff_ceiling(attempt);
            proptest::prop_assert!(here <= Duration::from_secs(cap_s));
            proptest::prop_assert!(here <= policy.backoff_ceiling(attempt + 1));
        }
    }
}
