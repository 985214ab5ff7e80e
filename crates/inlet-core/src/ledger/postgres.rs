//! PostgreSQL ledger backend.
//!
//! All state changes are conditional single-statement writes
//! (`INSERT .. ON CONFLICT DO NOTHING`, `UPDATE .. WHERE status = ..`), so
//! the database enforces the claim lock across every process that shares the
//! pool. No transaction spans a handler execution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    ledger::{DlqFilter, Ledger},
    models::{DeliveryId, DeliveryRecord, DeliveryStatus, NewDelivery},
};

const RECORD_COLUMNS: &str = "delivery_id, event_type, payload, content_type, status, \
                              attempt_count, last_error, created_at, updated_at";

/// Ledger backed by a shared PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: Arc<PgPool>,
}

impl PgLedger {
    /// Creates a ledger over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn require_status(&self, id: &DeliveryId) -> Result<DeliveryStatus> {
        let status: Option<DeliveryStatus> =
            sqlx::query_scalar("SELECT status FROM deliveries WHERE delivery_id = $1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await?;

        status.ok_or_else(|| CoreError::NotFound(id.clone()))
    }
}

#[async_trait::async_trait]
impl Ledger for PgLedger {
    async fn lookup_or_create(&self, delivery: NewDelivery) -> Result<(DeliveryRecord, bool)> {
        // Conditional insert: exactly one of any set of concurrent
        // redeliveries observes is_new = true.
        let inserted = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            INSERT INTO deliveries (
                delivery_id, event_type, payload, content_type,
                status, attempt_count, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'pending', 0, NOW(), NOW())
            ON CONFLICT (delivery_id) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(&delivery.delivery_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(&delivery.content_type)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(record) = inserted {
            return Ok((record, true));
        }

        let existing = self
            .find(&delivery.delivery_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(delivery.delivery_id.clone()))?;
        Ok((existing, false))
    }

    async fn claim(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        let claimed = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            UPDATE deliveries
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'pending'
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        match claimed {
            Some(record) => Ok(record),
            None => {
                let status = self.require_status(id).await?;
                Err(CoreError::AlreadyClaimed { id: id.clone(), status })
            },
        }
    }

    async fn commit_success(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        let updated = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            UPDATE deliveries
            SET status = 'succeeded', last_error = NULL, updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'processing'
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let status = self.require_status(id).await?;
                Err(CoreError::InvalidTransition(format!(
                    "delivery {id}: cannot move to succeeded from {status}"
                )))
            },
        }
    }

    async fn release_for_retry(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord> {
        let updated = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            UPDATE deliveries
            SET status = 'pending', last_error = $2, updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'processing'
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(error)
        .fetch_optional(&*self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let status = self.require_status(id).await?;
                Err(CoreError::InvalidTransition(format!(
                    "delivery {id}: cannot move to pending from {status}"
                )))
            },
        }
    }

    async fn dead_letter(&self, id: &DeliveryId, error: &str) -> Result<DeliveryRecord> {
        let updated = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            UPDATE deliveries
            SET status = 'dead_lettered', last_error = $2, updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'processing'
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(error)
        .fetch_optional(&*self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let status = self.require_status(id).await?;
                Err(CoreError::InvalidTransition(format!(
                    "delivery {id}: cannot move to dead_lettered from {status}"
                )))
            },
        }
    }

    async fn find(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>> {
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM deliveries WHERE delivery_id = $1",
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }

    async fn list_dead_lettered(&self, filter: &DlqFilter) -> Result<Vec<DeliveryRecord>> {
        let records = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            SELECT {RECORD_COLUMNS} FROM deliveries
            WHERE status = 'dead_lettered'
              AND ($1::text IS NULL OR event_type = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            ORDER BY updated_at DESC
            LIMIT $4
            ",
        ))
        .bind(&filter.event_type)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    async fn replay(&self, id: &DeliveryId) -> Result<DeliveryRecord> {
        let updated = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r"
            UPDATE deliveries
            SET status = 'pending', last_error = NULL, updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'dead_lettered'
            RETURNING {RECORD_COLUMNS}
            ",
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let status = self.require_status(id).await?;
                Err(CoreError::NotDeadLettered { id: id.clone(), status })
            },
        }
    }

    async fn purge(&self, id: &DeliveryId) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM deliveries WHERE delivery_id = $1 AND status = 'dead_lettered'")
                .bind(id)
                .execute(&*self.pool)
                .await?;

        if result.rows_affected() == 0 {
            let status = self.require_status(id).await?;
            return Err(CoreError::NotDeadLettered { id: id.clone(), status });
        }

        Ok(())
    }

    async fn recover_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE deliveries
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing' AND updated_at < $1
            ",
        )
        .bind(older_than)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}
