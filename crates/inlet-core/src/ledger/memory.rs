//! In-memory ledger for embedded deployments and tests.
//!
//! Every operation runs inside a single write-lock section, which gives the
//! same atomicity the PostgreSQL backend gets from conditional updates. Only
//! suitable for single-process deployments: nothing survives a restart and
//! no other process can observe the claims.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    ledger::{DlqFilter, Ledger},
    models::{DeliveryId, DeliveryRecord, DeliveryStatus, NewDelivery},
    time::{Clock, SystemClock},
};

/// Ledger backed by a process-local map.
#[derive(Debug)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, DeliveryRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    /// Creates an empty ledger using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Creates an empty ledger with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { records: RwLock::new(HashMap::new()), clock }
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the ledger holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Ledger for MemoryLedger {
    async fn lookup_or_create(&self, delivery: NewDelivery) -> Result<(DeliveryRecord, bool)> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(delivery.delivery_id.as_str()) {
            return Ok((existing.clone(), false));
        }

        let record = DeliveryRecord::new(delivery, self.clock.now_utc());
        records.insert(record.delivery_id.as_str().to_string(), record.clone());
        Ok((record, true))
    }

    async fn claim(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        let mut records = self.records.write().await;
        let record =
            records.get_mut(id.as_str()).ok_or_else(|| CoreError::NotFound(id.clone()))?;

        if record.status != DeliveryStatus::Pending {
            return Err(CoreError::AlreadyClaimed { id: id.clone(), status: record.status });
        }

        record.status = DeliveryStatus::Processing;
        record.attempt_count += 1;
        record.updated_at = self.clock.now_utc();
        Ok(record.clone())
    }

    async fn commit_success(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        self.transition_from_processing(id, DeliveryStatus::Succeeded, None).await
    }

    async fn release_for_retry(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord> {
        self.transition_from_processing(id, DeliveryStatus::Pending, Some(error)).await
    }

    async fn dead_letter(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord> {
        self.transition_from_processing(id, DeliveryStatus::DeadLettered, Some(error)).await
    }

    async fn find(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>> {
        Ok(self.records.read().await.get(id.as_str()).cloned())
    }

    async fn list_dead_lettered(&self, filter: &DlqFilter) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.read().await;

        let mut matching: Vec<DeliveryRecord> = records
            .values()
            .filter(|r| r.status == DeliveryStatus::DeadLettered)
            .filter(|r| filter.event_type.as_deref().is_none_or(|t| r.event_type == t))
            .filter(|r| filter.since.is_none_or(|since| r.created_at >= since))
            .filter(|r| filter.until.is_none_or(|until| r.created_at <= until))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching.truncate(usize::try_from(filter.limit).unwrap_or(0));
        Ok(matching)
    }

    async fn replay(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        let mut records = self.records.write().await;
        let record =
            records.get_mut(id.as_str()).ok_or_else(|| CoreError::NotFound(id.clone()))?;

        if record.status != DeliveryStatus::DeadLettered {
            return Err(CoreError::NotDeadLettered { id: id.clone(), status: record.status });
        }

        record.status = DeliveryStatus::Pending;
        record.last_error = None;
        record.updated_at = self.clock.now_utc();
        Ok(record.clone())
    }

    async fn purge(&self, id: &DeliveryId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get(id.as_str()).ok_or_else(|| CoreError::NotFound(id.clone()))?;

        if record.status != DeliveryStatus::DeadLettered {
            return Err(CoreError::NotDeadLettered { id: id.clone(), status: record.status });
        }

        records.remove(id.as_str());
        Ok(())
    }

    async fn recover_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let now = self.clock.now_utc();
        let mut recovered = 0u64;

        for record in records.values_mut() {
            if record.status == DeliveryStatus::Processing && record.updated_at < older_than {
                record.status = DeliveryStatus::Pending;
                record.updated_at = now;
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

impl MemoryLedger {
    /// Applies a processing-guarded transition under the write lock.
    async fn transition_from_processing(
        &self,
        id: &DeliveryId,
        to: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<DeliveryRecord> {
        let mut records = self.records.write().await;
        let record =
            records.get_mut(id.as_str()).ok_or_else(|| CoreError::NotFound(id.clone()))?;

        if record.status != DeliveryStatus::Processing {
            return Err(CoreError::InvalidTransition(format!(
                "delivery {id}: cannot move to {to} from {}",
                record.status
            )));
        }

        record.status = to;
        record.last_error = error.map(str::to_string);
        record.updated_at = self.clock.now_utc();
        Ok(record.clone())
    }
}
