//! Budget-aware backoff delays

use rand::Rng;
use std::time::Duration;

/// Absolute ceiling on any single delay.
const DELAY_CAP: Duration = Duration::from_secs(10);

/// Jitter spread applied to every delay (±25%).
const JITTER: f64 = 0.25;

/// Delay before retrying attempt `attempt` (0-indexed).
///
/// Exponential doubling from `base`, capped at the smaller of ten seconds
/// and half of the remaining budget, then jittered so simultaneous CLI
/// invocations don't retry in lockstep.
pub fn delay_for_attempt(attempt: u32, base: Duration, remaining_budget: Duration) -> Duration {
    let cap = DELAY_CAP.min(remaining_budget / 2);
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let capped = exp.min(cap);

    let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
    Duration::from_nanos((capped.as_nanos() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let budget = Duration::from_secs(600);
        let base = Duration::from_millis(100);
        // Strip jitter bounds: delay(k) must sit within ±25% of base*2^k
        for attempt in 0..4u32 {
            let expected = base * 2u32.pow(attempt);
            let delay = delay_for_attempt(attempt, base, budget);
            assert!(delay >= expected.mul_f64(0.75), "attempt {attempt}: {delay:?}");
            assert!(delay <= expected.mul_f64(1.25), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_delay_capped_at_ten_seconds() {
        let delay = delay_for_attempt(20, Duration::from_secs(1), Duration::from_secs(3600));
        assert!(delay <= Duration::from_secs(10).mul_f64(1.25));
    }

    #[test]
    fn test_delay_capped_at_half_remaining_budget() {
        let delay = delay_for_attempt(10, Duration::from_secs(1), Duration::from_secs(4));
        assert!(delay <= Duration::from_secs(2).mul_f64(1.25));
    }
}
