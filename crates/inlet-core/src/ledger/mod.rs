//! Delivery ledger: the durable idempotency store.
//!
//! Every delivery attempt group has exactly one record here, keyed by the
//! caller-supplied delivery id. The ledger is the single source of truth for
//! "has this already been processed" and the only cross-process coordination
//! point: all claim operations are atomic conditional writes, never
//! in-process locks, because redeliveries can arrive on any instance.
//!
//! Two backends implement the same trait: [`PgLedger`] for production and
//! [`MemoryLedger`] for embedded deployments and tests.

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{DeliveryId, DeliveryRecord, NewDelivery},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Filter for listing dead-lettered records.
#[derive(Debug, Clone)]
pub struct DlqFilter {
    /// Restrict to a single event type.
    pub event_type: Option<String>,
    /// Only records created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only records created at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of records to return.
    pub limit: i64,
}

impl Default for DlqFilter {
    fn default() -> Self {
        Self { event_type: None, since: None, until: None, limit: 100 }
    }
}

/// Storage operations for delivery records.
///
/// Implementations must make every state change an atomic conditional write:
/// `claim` succeeds for exactly one caller when several race on the same
/// pending record, and the commit operations only apply while the record is
/// still `processing`. That conditionality is what turns the ledger into a
/// distributed lock.
#[async_trait::async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Finds the record for a delivery id, creating it in `pending` if this
    /// is the first sighting. Returns the record and whether it was created
    /// by this call.
    ///
    /// Must be a single conditional insert so two concurrent redeliveries
    /// cannot both observe "new".
    async fn lookup_or_create(&self, delivery: NewDelivery) -> Result<(DeliveryRecord, bool)>;

    /// Atomically moves a `pending` record to `processing` and increments its
    /// attempt count, returning the claimed record.
    ///
    /// Fails with [`CoreError::AlreadyClaimed`](crate::CoreError::AlreadyClaimed)
    /// when the record is in any other state.
    async fn claim(&self, id: &DeliveryId) -> Result<DeliveryRecord>;

    /// Marks a `processing` record `succeeded` and clears its last error.
    /// Terminal.
    async fn commit_success(&self, id: &DeliveryId) -> Result<DeliveryRecord>;

    /// Returns a `processing` record to `pending` after a transient failure,
    /// recording the failure reason. The next redelivery or replay claims it
    /// again.
    async fn release_for_retry(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord>;

    /// Moves a `processing` record to `dead_lettered`, recording the failure
    /// reason. Terminal until replayed.
    async fn dead_letter(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord>;

    /// Fetches a record by id.
    async fn find(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>>;

    /// Lists dead-lettered records, newest state change first.
    async fn list_dead_lettered(&self, filter: &DlqFilter) -> Result<Vec<DeliveryRecord>>;

    /// Resets a `dead_lettered` record to `pending` for reprocessing.
    ///
    /// Attempt history is preserved; `last_error` is cleared. Fails with
    /// [`CoreError::NotDeadLettered`](crate::CoreError::NotDeadLettered)
    /// for records in any other state.
    async fn replay(&self, id: &DeliveryId) -> Result<DeliveryRecord>;

    /// Permanently deletes a `dead_lettered` record.
    async fn purge(&self, id: &DeliveryId) -> Result<()>;

    /// Force-reverts `processing` records whose claim went stale (the worker
    /// died mid-attempt) back to `pending`. Returns how many were recovered.
    async fn recover_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Verifies the backing store is reachable.
    async fn ping(&self) -> Result<()>;
}
