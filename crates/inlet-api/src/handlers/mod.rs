//! HTTP request handlers.
//!
//! Handlers follow a consistent pattern: validate inputs, run the operation
//! through the processor or ledger, and map outcomes to the response
//! contract. The calling system sees only 200/202/401/413/500 on the
//! ingestion path; internal error detail never crosses the trust boundary.
//! The operator surface additionally uses 404/409 for replay and purge
//! preconditions.

pub mod dlq;
pub mod health;
pub mod ingest;

pub use dlq::{list_dead_letters, purge_delivery, replay_delivery};
pub use health::{health_check, liveness_check, readiness_check};
pub use ingest::ingest_delivery;
