//! Domain event emission for downstream consumers.
//!
//! Once a delivery's handler succeeds, the engine publishes one domain event
//! to the configured sink (reporting, analytics, and other external
//! collaborators subscribe there). Emission shares the attempt's
//! at-least-once envelope: a failed emission fails the whole attempt, and
//! handler idempotency covers the resulting re-emission on retry.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{DeliveryId, DeliveryRecord};

/// Error returned when a sink fails to publish an event.
#[derive(Debug, Clone, Error)]
#[error("event emission failed: {0}")]
pub struct EmitError(pub String);

/// Events emitted by the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// A delivery's handler completed successfully.
    Processed(ProcessedEvent),

    /// A delivery exhausted its retry budget or failed permanently.
    Failed(DeadLetteredEvent),
}

impl DeliveryEvent {
    /// Builds the success event for a delivery that just processed.
    pub fn processed(record: &DeliveryRecord, at: DateTime<Utc>) -> Self {
        Self::Processed(ProcessedEvent {
            delivery_id: record.delivery_id.clone(),
            event_type: record.event_type.clone(),
            attempt_count: record.attempt_count,
            payload_size: record.payload.len(),
            processed_at: at,
        })
    }

    /// Builds the dead-letter notification event.
    pub fn dead_lettered(record: &DeliveryRecord, at: DateTime<Utc>) -> Self {
        Self::Failed(DeadLetteredEvent {
            delivery_id: record.delivery_id.clone(),
            event_type: record.event_type.clone(),
            attempt_count: record.attempt_count,
            last_error: record.last_error.clone(),
            dead_lettered_at: at,
        })
    }

    /// The delivery this event concerns.
    pub fn delivery_id(&self) -> &DeliveryId {
        match self {
            Self::Processed(e) => &e.delivery_id,
            Self::Failed(e) => &e.delivery_id,
        }
    }
}

/// Emitted once per delivery when its handler succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// The delivery that was processed.
    pub delivery_id: DeliveryId,
    /// Event type the delivery carried.
    pub event_type: String,
    /// Attempts it took, including the successful one.
    pub attempt_count: i32,
    /// Size of the processed payload in bytes.
    pub payload_size: usize,
    /// When processing completed.
    pub processed_at: DateTime<Utc>,
}

/// Emitted best-effort when a delivery is dead-lettered.
///
/// Unlike [`ProcessedEvent`], failure to publish this event never blocks the
/// state transition; it exists for operator alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetteredEvent {
    /// The delivery that was dead-lettered.
    pub delivery_id: DeliveryId,
    /// Event type the delivery carried.
    pub event_type: String,
    /// Attempts consumed before giving up.
    pub attempt_count: i32,
    /// The failure that sealed the record.
    pub last_error: Option<String>,
    /// When the record was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Destination for domain events.
///
/// Implementations publish to whatever bus the deployment uses. `emit`
/// returns a `Result` because a failed success-event emission must fail the
/// delivery attempt so it is retried.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Publishes one event.
    async fn emit(&self, event: DeliveryEvent) -> Result<(), EmitError>;
}

/// Sink that discards all events.
#[derive(Debug, Default)]
pub struct NoOpSink;

impl NoOpSink {
    /// Creates a new no-op sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventSink for NoOpSink {
    async fn emit(&self, _event: DeliveryEvent) -> Result<(), EmitError> {
        Ok(())
    }
}

/// Sink that logs events through `tracing`.
///
/// The default for deployments whose downstream consumers tail structured
/// logs rather than a message bus.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Creates a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: DeliveryEvent) -> Result<(), EmitError> {
        match &event {
            DeliveryEvent::Processed(e) => tracing::info!(
                delivery_id = %e.delivery_id,
                event_type = %e.event_type,
                attempt_count = e.attempt_count,
                "delivery processed"
            ),
            DeliveryEvent::Failed(e) => tracing::warn!(
                delivery_id = %e.delivery_id,
                event_type = %e.event_type,
                attempt_count = e.attempt_count,
                last_error = e.last_error.as_deref().unwrap_or("unknown"),
                "delivery dead-lettered"
            ),
        }
        Ok(())
    }
}

/// Fans one event out to multiple subscribers.
///
/// Subscribers run concurrently. The first failure is propagated so the
/// attempt is retried; subscribers must tolerate receiving the same event
/// again after a partial fan-out.
#[derive(Debug, Clone, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MulticastSink {
    /// Creates a multicast sink with no subscribers.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait::async_trait]
impl EventSink for MulticastSink {
    async fn emit(&self, event: DeliveryEvent) -> Result<(), EmitError> {
        let emissions = self.sinks.iter().map(|sink| {
            let event = event.clone();
            async move { sink.emit(event).await }
        });

        let results = futures::future::join_all(emissions).await;
        results.into_iter().collect()
    }
}

/// Sink that buffers events in memory.
///
/// Used by embedding applications and tests to observe exactly what the
/// engine emitted.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RwLock<Vec<DeliveryEvent>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub async fn events(&self) -> Vec<DeliveryEvent> {
        self.events.read().await.clone()
    }

    /// Number of events emitted so far.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether nothing has been emitted.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: DeliveryEvent) -> Result<(), EmitError> {
        self.events.write().await.push(event);
        Ok(())
    }
}
