//! Error types for ledger and domain operations.
//!
//! The variants mirror the ledger's conditional-write contract: concurrency
//! conflicts and precondition failures are distinct from infrastructure
//! errors so callers can map them to idempotent responses instead of
//! retrying blindly.

use thiserror::Error;

use crate::models::{DeliveryId, DeliveryStatus};

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for ledger operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// No record exists for the given delivery id.
    #[error("delivery not found: {0}")]
    NotFound(DeliveryId),

    /// The record could not be claimed because it is not pending.
    ///
    /// Either another worker holds the `processing` claim or the record is
    /// already terminal. Not an error from the caller's perspective: the
    /// ingestion layer turns this into the idempotent accepted response.
    #[error("delivery {id} cannot be claimed from status {status}")]
    AlreadyClaimed {
        /// The delivery that was contended.
        id: DeliveryId,
        /// Status observed when the claim failed.
        status: DeliveryStatus,
    },

    /// Replay or purge was requested for a record that is not dead-lettered.
    #[error("delivery {id} is not dead-lettered (status {status})")]
    NotDeadLettered {
        /// The delivery the operation targeted.
        id: DeliveryId,
        /// Its current status.
        status: DeliveryStatus,
    },

    /// A commit was attempted from a state the transition does not allow.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Database(format!("unique constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}
