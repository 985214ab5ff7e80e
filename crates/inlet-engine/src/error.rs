//! Handler failure classification.
//!
//! The retry state machine only needs one bit from a failed handler: is the
//! failure worth redelivering? Transient failures (downstream dependency
//! unavailable, timeout) consume retry budget; permanent failures (structural
//! problems no redelivery can fix) dead-letter immediately.

use thiserror::Error;

/// Failure reported by a delivery handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Temporary failure; the delivery is eligible for retry.
    #[error("transient handler failure: {message}")]
    Transient {
        /// What went wrong.
        message: String,
    },

    /// Structural failure; retrying can never succeed.
    #[error("permanent handler failure: {message}")]
    Permanent {
        /// What went wrong.
        message: String,
    },
}

impl HandlerError {
    /// Creates a transient (retryable) failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    /// Creates a permanent (non-retryable) failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into() }
    }

    /// Whether this failure should consume retry budget rather than
    /// dead-letter immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
