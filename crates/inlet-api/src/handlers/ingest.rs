//! Webhook ingestion handler.
//!
//! The single inbound endpoint for the upstream system. Authenticates the
//! signature before anything touches the ledger — unauthenticated traffic
//! must not pollute storage — then hands the delivery to the processor and
//! maps its outcome onto the response contract:
//!
//! - `200` processed successfully on this call
//! - `202` already processed, in flight, or dead-lettered (idempotent no-op)
//! - `401` signature invalid or required headers missing/malformed
//! - `413` payload exceeds the size cap
//! - `500` processing failed with retry budget remaining; redeliver

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use inlet_core::models::{DeliveryId, DeliveryRecord, NewDelivery};
use inlet_engine::IngestOutcome;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{crypto, server::AppState};

/// Largest payload the ingestion endpoint accepts.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Response for an accepted delivery.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// The delivery's idempotency key.
    pub delivery_id: String,
    /// Lifecycle status after this call.
    pub status: String,
    /// Processing attempts so far.
    pub attempt_count: i32,
}

impl IngestResponse {
    fn from_record(record: &DeliveryRecord) -> Self {
        Self {
            delivery_id: record.delivery_id.to_string(),
            status: record.status.to_string(),
            attempt_count: record.attempt_count,
        }
    }
}

/// Error payload with a stable machine-readable code.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Error code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Ingests one signed webhook delivery.
#[instrument(
    name = "ingest_delivery",
    skip(state, headers, body),
    fields(
        delivery_id = headers.get("delivery-id").and_then(|v| v.to_str().ok()).unwrap_or("none"),
        event_type = headers.get("event-type").and_then(|v| v.to_str().ok()).unwrap_or("none"),
        payload_size = body.len(),
    )
)]
pub async fn ingest_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > MAX_PAYLOAD_SIZE {
        warn!(payload_size = body.len(), limit = MAX_PAYLOAD_SIZE, "payload exceeds size limit");
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("payload of {} bytes exceeds the 10MB limit", body.len()),
        );
    }

    // Authentication first: failures must not create ledger records.
    let signature = header_value(&headers, "signature");
    let Some(signature) = signature else {
        return unauthorized("missing_signature", "Signature header is required");
    };

    if let Err(e) = crypto::verify_signature(
        &body,
        signature,
        &state.signing_secret,
        state.clock.now_utc(),
        state.signature_tolerance,
    ) {
        warn!(error = %e, "signature verification failed");
        return unauthorized("invalid_signature", "signature verification failed");
    }

    let Some(delivery_id) = header_value(&headers, "delivery-id") else {
        return unauthorized("missing_delivery_id", "Delivery-Id header is required");
    };

    let Some(event_type) = header_value(&headers, "event-type") else {
        return unauthorized("missing_event_type", "Event-Type header is required");
    };

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let delivery = NewDelivery {
        delivery_id: DeliveryId::new(delivery_id),
        event_type: event_type.to_string(),
        payload: body.to_vec(),
        content_type,
    };

    match state.processor.ingest(delivery).await {
        Ok(IngestOutcome::Processed(record)) => {
            info!(delivery_id = %record.delivery_id, "delivery processed");
            (StatusCode::OK, Json(IngestResponse::from_record(&record))).into_response()
        },
        Ok(IngestOutcome::AlreadyAccepted(record) | IngestOutcome::DeadLettered(record)) => {
            // Idempotent acceptance: nothing left for the caller to do.
            (StatusCode::ACCEPTED, Json(IngestResponse::from_record(&record))).into_response()
        },
        Ok(IngestOutcome::Retrying(record)) => {
            warn!(
                delivery_id = %record.delivery_id,
                attempt_count = record.attempt_count,
                "attempt failed, awaiting redelivery"
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_failed",
                "processing failed; redeliver to retry",
            )
        },
        Err(e) => {
            error!(error = %e, "ledger operation failed during ingestion");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error; redeliver to retry",
            )
        },
    }
}

/// Extracts a non-empty header value.
fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

fn unauthorized(code: &str, message: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, code, message)
}

/// Creates a standardized error response.
pub(crate) fn error_response(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.into(), message: message.into() },
    };
    (status, Json(body)).into_response()
}
