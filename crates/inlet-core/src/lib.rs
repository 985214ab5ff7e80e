//! Core domain types for the Inlet webhook reliability engine.
//!
//! Defines delivery records and their lifecycle states, the delivery ledger
//! abstraction that enforces idempotency and cross-process claim semantics,
//! and the event sink used to publish domain events to downstream consumers.
//! The engine and HTTP crates build on these foundations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    DeliveryEvent, EmitError, EventSink, MulticastSink, NoOpSink, RecordingSink, TracingSink,
};
pub use ledger::{DlqFilter, Ledger, MemoryLedger, PgLedger};
pub use models::{DeliveryId, DeliveryRecord, DeliveryStatus, NewDelivery};
pub use time::{Clock, SystemClock, TestClock};
