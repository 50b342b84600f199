//! Retry policy and the pure outcome-to-transition decision.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::job::JobOutcome;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay every time.
    Fixed {
        /// Delay before each retry.
        delay: Duration,
    },
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Upper bound.
        max: Duration,
    },
}

/// Attempt ceiling plus backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first. Stamped onto each new
    /// job; the job's own ceiling is what [`decide`](Self::decide) enforces.
    pub max_attempts: u32,
    /// Delay shape.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(30),
                max: Duration::from_secs(15 * 60),
            },
        }
    }
}

/// What the queue should do with a job after an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Mark succeeded.
    Succeed,
    /// Mark retryable and re-arm after `after`.
    Retry {
        /// Backoff before the next attempt.
        after: Duration,
        /// Failure reason.
        error: String,
    },
    /// Mark terminally failed.
    Fail {
        /// Failure reason.
        error: String,
    },
}

impl RetryPolicy {
    /// Policy with a fixed delay.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Backoff before retrying after the given (1-based) attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift).map_or(max, |d| d.min(max))
            }
        }
    }

    /// Maps an outcome to a transition. `attempts` counts the execution
    /// that just finished; `ceiling` is the job's own attempt limit.
    pub fn decide(&self, outcome: JobOutcome, attempts: u32, ceiling: u32) -> Transition {
        match outcome {
            JobOutcome::Succeeded => Transition::Succeed,
            JobOutcome::Terminal(error) => Transition::Fail { error },
            JobOutcome::Retryable(error) if attempts >= ceiling => {
                Transition::Fail {
                    error: format!("{error} (gave up after {attempts} attempts)"),
                }
            }
            JobOutcome::Retryable(error) => Transition::Retry {
                after: self.delay_for(attempts),
                error,
            },
        }
    }
}
