use std::time::Duration;

use proptest::prelude::*;
use harness_exec::exec::{RetryBudget, RetrySchedule, BACKOFF_GROWTH_FACTOR};

// Escalating budgets with initial <= max, plus a monotone sequence of
// elapsed times at which attempts fail.
fn escalating_case() -> impl Strategy<Value = (u64, u64, u64, Vec<u64>)> {
    (1u64..2_000, 1u64..20_000, 1u64..60_000).prop_flat_map(|(initial, extra, max_time)| {
        let max = initial + extra;
        let steps = proptest::collection::vec(0u64..5_000, 1..20);
        (Just(initial), Just(max), Just(max_time), steps)
    })
}

proptest! {
    #[test]
    fn escalating_pauses_stay_within_bounds((initial, max, max_time, steps) in escalating_case()) {
        let mut schedule = RetrySchedule::new(RetryBudget::Escalating {
            initial_interval: Duration::from_millis(initial),
            max_interval: Duration::from_millis(max),
            max_time: Duration::from_millis(max_time),
        });

        let mut elapsed = 0u64;
        let mut previous: Option<Duration> = None;
        for step in steps {
            elapsed += step;
            let remaining = max_time.saturating_sub(elapsed);
            match schedule.after_failure(Duration::from_millis(elapsed)) {
                Some(pause) => {
                    prop_assert!(remaining > 0);
                    prop_assert!(!pause.is_zero());
                    prop_assert!(pause <= Duration::from_millis(max));
                    prop_assert!(pause <= Duration::from_millis(remaining));
                    if let Some(prev) = previous {
                        // Growth is bounded by the factor (clipping only shrinks).
                        prop_assert!(pause <= prev * BACKOFF_GROWTH_FACTOR);
                    }
                    previous = Some(pause);
                }
                None => {
                    prop_assert_eq!(remaining, 0);
                    // Exhaustion is final.
                    prop_assert!(schedule.after_failure(Duration::from_millis(elapsed)).is_none());
                    break;
                }
            }
        }
    }

    #[test]
    fn attempts_budget_yields_exactly_attempts_minus_one_pauses(attempts in 1u32..50, interval in 0u64..10_000) {
        let mut schedule = RetrySchedule::new(RetryBudget::Attempts {
            attempts,
            interval: Duration::from_millis(interval),
        });

        let mut pauses = 0;
        while schedule.should_attempt(Duration::ZERO) {
            match schedule.after_failure(Duration::ZERO) {
                Some(pause) => {
                    prop_assert_eq!(pause, Duration::from_millis(interval));
                    pauses += 1;
                }
                None => break,
            }
        }
        prop_assert_eq!(pauses, attempts - 1);
        prop_assert_eq!(schedule.attempts_made(), attempts);
    }
}
