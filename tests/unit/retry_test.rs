//! Tests for the retry policy

use std::time::Duration;

use lotkeeper::core::{JobOutcome, RetryPolicy, Transition};

#[test]
fn test_default_policy() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay_for(1), Duration::from_secs(30));
}

#[test]
fn test_attempt_ceiling_is_respected() {
    let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
    let outcomes: Vec<_> = (1..=3)
        .map(|attempt| policy.decide(JobOutcome::Retryable("boom".into()), attempt, policy.max_attempts))
        .collect();
    assert!(matches!(outcomes[0], Transition::Retry { .. }));
    assert!(matches!(outcomes[1], Transition::Retry { .. }));
    assert!(matches!(outcomes[2], Transition::Fail { .. }));
}

#[test]
fn test_single_attempt_policy_never_retries() {
    let policy = RetryPolicy::fixed(1, Duration::ZERO);
    assert!(matches!(
        policy.decide(JobOutcome::Retryable("boom".into()), 1, policy.max_attempts),
        Transition::Fail { .. }
    ));
}
