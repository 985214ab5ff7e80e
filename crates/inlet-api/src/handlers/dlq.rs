//! Dead-letter management handlers (internal operator surface).
//!
//! Replay does not re-verify the original signature: the payload was
//! authenticated on first receipt, and once accepted into the ledger a
//! delivery is trusted platform data.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use inlet_core::{
    error::CoreError,
    ledger::{DlqFilter, Ledger as _},
    models::{DeliveryId, DeliveryRecord},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::{handlers::ingest::error_response, server::AppState};

const MAX_PAGE_SIZE: i64 = 500;

/// Query parameters for the dead-letter listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqQuery {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Only records created at or after this instant (RFC 3339).
    pub since: Option<DateTime<Utc>>,
    /// Only records created at or before this instant (RFC 3339).
    pub until: Option<DateTime<Utc>>,
    /// Page size, capped at 500.
    pub limit: Option<i64>,
}

/// One dead-lettered record as exposed to operators.
///
/// The payload itself is omitted: it can be arbitrary bytes and operators
/// inspect it through replay, not through the listing.
#[derive(Debug, Serialize)]
pub struct DeliveryView {
    /// The delivery's idempotency key.
    pub delivery_id: String,
    /// Event type the delivery carried.
    pub event_type: String,
    /// Current lifecycle status.
    pub status: String,
    /// Processing attempts so far.
    pub attempt_count: i32,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// When the delivery was first received.
    pub created_at: DateTime<Utc>,
    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryView {
    fn from_record(record: &DeliveryRecord) -> Self {
        Self {
            delivery_id: record.delivery_id.to_string(),
            event_type: record.event_type.clone(),
            status: record.status.to_string(),
            attempt_count: record.attempt_count,
            last_error: record.last_error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Page of dead-lettered records.
#[derive(Debug, Serialize)]
pub struct DlqPage {
    /// Records matching the filter, newest state change first.
    pub deliveries: Vec<DeliveryView>,
    /// Number of records in this page.
    pub count: usize,
}

/// Lists dead-lettered deliveries.
#[instrument(name = "list_dead_letters", skip(state))]
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Response {
    let filter = DlqFilter {
        event_type: query.event_type,
        since: query.since,
        until: query.until,
        limit: query.limit.unwrap_or(100).clamp(1, MAX_PAGE_SIZE),
    };

    match state.ledger.list_dead_lettered(&filter).await {
        Ok(records) => {
            let deliveries: Vec<DeliveryView> =
                records.iter().map(DeliveryView::from_record).collect();
            let count = deliveries.len();
            (StatusCode::OK, Json(DlqPage { deliveries, count })).into_response()
        },
        Err(e) => {
            error!(error = %e, "dead-letter listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "listing failed")
        },
    }
}

/// Replays one dead-lettered delivery and returns the resulting record.
#[instrument(name = "replay_delivery", skip(state))]
pub async fn replay_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<String>,
) -> Response {
    let id = DeliveryId::new(delivery_id);

    match state.processor.replay(&id).await {
        Ok(outcome) => {
            let record = outcome.record();
            info!(
                delivery_id = %record.delivery_id,
                status = %record.status,
                attempt_count = record.attempt_count,
                "replay completed"
            );
            (StatusCode::OK, Json(DeliveryView::from_record(record))).into_response()
        },
        Err(e) => precondition_error(e, "replay"),
    }
}

/// Permanently removes one dead-lettered delivery.
#[instrument(name = "purge_delivery", skip(state))]
pub async fn purge_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<String>,
) -> Response {
    let id = DeliveryId::new(delivery_id);

    match state.ledger.purge(&id).await {
        Ok(()) => {
            info!(delivery_id = %id, "delivery purged");
            StatusCode::NO_CONTENT.into_response()
        },
        Err(e) => precondition_error(e, "purge"),
    }
}

/// Maps ledger precondition failures onto operator-facing status codes.
fn precondition_error(err: CoreError, operation: &str) -> Response {
    match err {
        CoreError::NotFound(id) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no delivery with id '{id}'"),
        ),
        CoreError::NotDeadLettered { id, status } => error_response(
            StatusCode::CONFLICT,
            "not_dead_lettered",
            format!("delivery '{id}' is {status}, not dead_lettered"),
        ),
        other => {
            error!(error = %other, "{operation} failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation} failed"),
            )
        },
    }
}
