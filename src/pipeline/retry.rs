//! Bounded retry policy for calls to the transformation service.
//!
//! The schedule is deliberately simple and fully deterministic:
//!
//! * a transient failure before retry `n` (1-based) waits
//!   `initial + step × (n − 1)` (linear) or `initial × factor^(n − 1)`
//!   (exponential), capped at `max_delay`; the sequence never decreases;
//! * an unclassified failure waits a short fixed pause and does not advance
//!   the growth curve;
//! * a fatal failure is never retried;
//! * at most `max_attempts` calls are made in total, so the loop always ends.

use crate::config::{BackoffGrowth, RewriteConfig};
use crate::error::ServiceError;
use std::time::Duration;

/// What the retry loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try again.
    RetryAfter(Duration),
    /// Stop now; the failure is final.
    GiveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    growth: BackoffGrowth,
    max_delay: Duration,
    unknown_pause: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(2),
            growth: BackoffGrowth::default(),
            max_delay: Duration::from_secs(60),
            unknown_pause: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &RewriteConfig) -> Self {
        Self::new(config.max_retries)
            .initial_delay(Duration::from_millis(config.initial_backoff_ms))
            .growth(config.backoff_growth)
            .max_delay(Duration::from_millis(config.max_backoff_ms))
            .unknown_pause(Duration::from_millis(config.unknown_error_pause_ms))
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn growth(mut self, growth: BackoffGrowth) -> Self {
        self.growth = match growth {
            BackoffGrowth::Exponential { factor } if factor.is_nan() || factor < 1.0 => {
                BackoffGrowth::Exponential { factor: 1.0 }
            }
            g => g,
        };
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn unknown_pause(mut self, pause: Duration) -> Self {
        self.unknown_pause = pause;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before retry number `retry` (1-based) of a transient failure.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let n = retry.max(1) - 1;
        let delay = match self.growth {
            BackoffGrowth::Linear { step_ms } => self
                .initial_delay
                .saturating_add(Duration::from_millis(step_ms).saturating_mul(n)),
            BackoffGrowth::Exponential { factor } => {
                let scaled = self.initial_delay.as_secs_f64() * factor.powi(n.min(1_000) as i32);
                if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(scaled)
                } else {
                    self.max_delay
                }
            }
        };
        delay.min(self.max_delay)
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    ///
    /// `transient_retries` is how many transient failures preceded this one
    /// and drives the growth curve.
    pub fn decide(&self, attempt: u32, transient_retries: u32, error: &ServiceError) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match error {
            ServiceError::Fatal(_) => RetryDecision::GiveUp,
            ServiceError::Transient(_) => {
                RetryDecision::RetryAfter(self.backoff_delay(transient_retries + 1))
            }
            ServiceError::Unknown(_) => {
                RetryDecision::RetryAfter(self.unknown_pause.min(self.max_delay))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> ServiceError {
        ServiceError::Transient("429".into())
    }

    #[test]
    fn exponential_schedule_doubles_then_caps() {
        let p = RetryPolicy::new(10)
            .initial_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(60));
        let waits: Vec<u64> = (1..=7).map(|n| p.backoff_delay(n).as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn linear_schedule_adds_a_step() {
        let p = RetryPolicy::new(10)
            .initial_delay(Duration::from_secs(5))
            .growth(BackoffGrowth::Linear { step_ms: 5000 })
            .max_delay(Duration::from_secs(18));
        let waits: Vec<u64> = (1..=5).map(|n| p.backoff_delay(n).as_secs()).collect();
        assert_eq!(waits, vec![5, 10, 15, 18, 18]);
    }

    #[test]
    fn schedule_never_decreases() {
        for growth in [
            BackoffGrowth::Linear { step_ms: 250 },
            BackoffGrowth::Exponential { factor: 1.5 },
            BackoffGrowth::Exponential { factor: 0.2 },
        ] {
            let p = RetryPolicy::new(50).growth(growth);
            let mut prev = Duration::ZERO;
            for n in 1..50 {
                let d = p.backoff_delay(n);
                assert!(d >= prev, "{growth:?} shrank at retry {n}");
                assert!(d <= Duration::from_secs(60));
                prev = d;
            }
        }
    }

    #[test]
    fn huge_retry_numbers_saturate_at_cap() {
        let p = RetryPolicy::new(3).max_delay(Duration::from_secs(30));
        assert_eq!(p.backoff_delay(u32::MAX), Duration::from_secs(30));
        let lin = RetryPolicy::new(3)
            .growth(BackoffGrowth::Linear { step_ms: u64::MAX })
            .max_delay(Duration::from_secs(30));
        assert_eq!(lin.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn fatal_is_never_retried() {
        let p = RetryPolicy::new(5);
        assert_eq!(
            p.decide(1, 0, &ServiceError::Fatal("404".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn last_attempt_gives_up() {
        let p = RetryPolicy::new(3);
        assert!(matches!(p.decide(2, 1, &transient()), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, 2, &transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn unknown_errors_use_fixed_pause() {
        let p = RetryPolicy::new(5)
            .initial_delay(Duration::from_secs(4))
            .unknown_pause(Duration::from_millis(700));
        assert_eq!(
            p.decide(1, 3, &ServiceError::Unknown("??".into())),
            RetryDecision::RetryAfter(Duration::from_millis(700))
        );
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }
}
