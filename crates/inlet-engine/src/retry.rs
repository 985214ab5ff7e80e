//! Retry and dead-letter decisions.
//!
//! There is deliberately no backoff here: the upstream system owns the
//! redelivery schedule, so this engine decides only *whether* a failed
//! attempt stays retryable, never *when* the next attempt runs. Deployments
//! without an upstream redelivery mechanism need an external trigger (or a
//! periodic operator replay) to drive retries.

use crate::error::HandlerError;

/// Retry budget for failed deliveries.
///
/// Configured per deployment, not per event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum processing attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// What to do with a delivery after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the record to `pending`; a future redelivery retries it.
    Retry,
    /// Move the record to `dead_lettered`.
    DeadLetter {
        /// Why no further attempts will run.
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Decides the next state after a failed attempt.
    ///
    /// `attempt_count` is the number of attempts already made, including the
    /// one that just failed.
    pub fn decide(&self, attempt_count: u32, error: &HandlerError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::DeadLetter { reason: format!("permanent failure: {error}") };
        }

        if attempt_count >= self.max_attempts {
            return RetryDecision::DeadLetter {
                reason: format!("retry budget exhausted after {attempt_count} attempts"),
            };
        }

        RetryDecision::Retry
    }
}
