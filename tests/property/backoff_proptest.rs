//! Property-based tests for the backoff schedule

use std::time::Duration;

use campo_sync::offline::{BackoffPolicy, BackoffState};
use proptest::prelude::*;

fn expected_after(policy: BackoffPolicy, failures: u32) -> Duration {
    let base = policy.base.as_millis();
    let doubled = base.saturating_mul(1u128 << failures.min(64));
    Duration::from_millis(doubled.min(policy.ceiling.as_millis()) as u64)
}

fn policy_strategy() -> impl Strategy<Value = BackoffPolicy> {
    (1u64..60_000, 1u64..64).prop_map(|(base_ms, factor)| BackoffPolicy {
        base: Duration::from_millis(base_ms),
        ceiling: Duration::from_millis(base_ms * factor),
    })
}

proptest! {
    #[test]
    fn test_interval_is_capped_doubling(policy in policy_strategy(), failures in 0u32..40) {
        let mut state = BackoffState::new(policy);
        for _ in 0..failures {
            state.record_failure();
        }

        prop_assert_eq!(state.current_interval(), expected_after(policy, failures));
        prop_assert!(state.current_interval() <= policy.ceiling);
        prop_assert!(state.current_interval() >= policy.base);
        prop_assert_eq!(state.consecutive_failures(), failures);
    }

    #[test]
    fn test_clean_pass_always_resets(policy in policy_strategy(), failures in 0u32..40) {
        let mut state = BackoffState::new(policy);
        for _ in 0..failures {
            state.record_pass(true);
        }

        prop_assert_eq!(state.record_pass(false), policy.base);
        prop_assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn test_interval_never_shrinks_while_failing(policy in policy_strategy(), failures in 1u32..40) {
        let mut state = BackoffState::new(policy);
        let mut previous = state.current_interval();
        for _ in 0..failures {
            let next = state.record_failure();
            prop_assert!(next >= previous);
            previous = next;
        }
    }
}
