use std::time::Duration;

use rand::Rng;

use crate::errors::ErrorKind;

/// Exponential backoff with jitter for transient adapter failures.
///
/// Delay for attempt `n` (0-based) is `min(base * 2^n, cap)` plus a uniform
/// jitter drawn from `[0, base / 10)`. Non-transport kinds are never retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), cap: Duration::from_secs(10), max_attempts: 3 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do after a classified failure on attempt `attempt`
    /// (0-based: the first failed call is attempt 0).
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay(attempt))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let base_ms = self.base.as_millis() as u64;
        let capped_ms = base_ms.saturating_mul(multiplier).min(self.cap.as_millis() as u64);

        let jitter_span_ms = base_ms / 10;
        let jitter_ms = if jitter_span_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_span_ms)
        };

        Duration::from_millis(capped_ms + jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RetryDecision, RetryPolicy};
    use crate::errors::ErrorKind;

    #[test]
    fn delay_doubles_then_hits_cap() {
        let policy = RetryPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            max_attempts: 16,
        };

        for (attempt, expected_floor_ms) in [(0_u32, 1_000_u64), (1, 2_000), (2, 4_000), (3, 8_000)]
        {
            let RetryDecision::RetryAfter(delay) = policy.decide(ErrorKind::Transport, attempt)
            else {
                panic!("attempt {attempt} should be retried");
            };
            let millis = delay.as_millis() as u64;
            assert!(millis >= expected_floor_ms, "attempt {attempt}: {millis}ms");
            assert!(millis < expected_floor_ms + 100, "attempt {attempt}: {millis}ms");
        }

        // Attempt 4 would be 16s uncapped; the cap bounds it at 10s plus jitter.
        let RetryDecision::RetryAfter(delay) = policy.decide(ErrorKind::Transport, 4) else {
            panic!("attempt 4 should be retried");
        };
        let millis = delay.as_millis() as u64;
        assert!((10_000..10_100).contains(&millis), "capped delay was {millis}ms");
    }

    #[test]
    fn gives_up_after_budget() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(ErrorKind::Transport, 2), RetryDecision::RetryAfter(_)));
        assert_eq!(policy.decide(ErrorKind::Transport, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(ErrorKind::Transport, 17), RetryDecision::GiveUp);
    }

    #[test]
    fn never_retries_non_transport_kinds() {
        let policy = RetryPolicy::default();
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Ambiguity,
            ErrorKind::Reauthorize,
            ErrorKind::Permission,
            ErrorKind::NotFound,
            ErrorKind::Schema,
            ErrorKind::Internal,
        ] {
            assert_eq!(policy.decide(kind, 0), RetryDecision::GiveUp, "{kind:?}");
        }
    }
}
