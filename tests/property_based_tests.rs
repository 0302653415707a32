//! Property-based checks of the backoff schedule and breaker thresholds.

use proptest::prelude::*;
use reliability_core::resilience::retry::{apply_jitter, compute_delay};
use reliability_core::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::time::Duration;

proptest! {
    #[test]
    fn delay_is_capped_power_of_two(attempt in 0u32..64) {
        let delay = compute_delay(
            attempt,
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
        );
        let expected = 2f64.powi(attempt as i32).min(60.0);
        prop_assert!((delay.as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn jitter_stays_within_half_to_full(attempt in 0u32..10) {
        let pre_jitter = compute_delay(
            attempt,
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
        );
        let jittered = apply_jitter(pre_jitter);
        prop_assert!(jittered <= pre_jitter);
        prop_assert!(jittered >= pre_jitter / 2);
    }

    #[test]
    fn delays_never_decrease(
        attempt in 0u32..30,
        base_ms in 1u64..5_000,
        exponential_base in 1.0f64..4.0,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_secs(60);
        let current = compute_delay(attempt, base, max, exponential_base);
        let next = compute_delay(attempt + 1, base, max, exponential_base);
        prop_assert!(next >= current);
        prop_assert!(next <= max);
    }

    #[test]
    fn breaker_opens_exactly_at_threshold(threshold in 1u32..20) {
        let breaker = CircuitBreaker::new(
            "prop",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(60), 3),
        );
        for _ in 1..threshold {
            breaker.record_failure();
        }
        prop_assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        prop_assert_eq!(breaker.state(), CircuitState::Open);
    }
}
