//! Delivery processing engine.
//!
//! Takes authenticated deliveries through the full reliability pipeline:
//! ledger claim, handler dispatch, domain event emission, and the
//! retry/dead-letter state machine. The engine never schedules its own
//! retries — it is re-entered by upstream redelivery or operator replay, so
//! its job is to be safely re-entrant, not to be a scheduler.
//!
//! # Attempt lifecycle
//!
//! ```text
//! ingest --> lookup_or_create --> claim --> handler --> emit --> succeeded
//!                 |                 |          |
//!                 |                 |          +-- transient --> pending / dead_lettered
//!                 |                 |          +-- permanent --> dead_lettered
//!                 |                 +-- already claimed ------> accepted (no-op)
//!                 +-- terminal record ------------------------> accepted (no-op)
//! ```

pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod retry;

pub use dispatcher::{AckHandler, DeliveryHandler, HandlerRegistry};
pub use error::HandlerError;
pub use processor::{IngestOutcome, Processor};
pub use retry::{RetryDecision, RetryPolicy};
