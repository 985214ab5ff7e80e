//! Delivery processor: orchestrates one attempt end to end.
//!
//! The processor is invoked by one short-lived worker per inbound request;
//! any number may run concurrently across processes. All coordination goes
//! through the ledger's atomic claims — the processor itself holds no locks
//! and keeps no state between attempts.

use std::sync::Arc;

use inlet_core::{
    error::{CoreError, Result},
    events::{DeliveryEvent, EventSink},
    ledger::Ledger,
    models::{DeliveryId, DeliveryRecord, DeliveryStatus, NewDelivery},
    time::Clock,
};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::HandlerRegistry,
    error::HandlerError,
    retry::{RetryDecision, RetryPolicy},
};

/// Result of running one delivery through the pipeline.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Handler and event emission succeeded on this call.
    Processed(DeliveryRecord),

    /// The attempt failed but retry budget remains; the caller should
    /// redeliver on its own schedule.
    Retrying(DeliveryRecord),

    /// The delivery was dead-lettered (permanent failure or exhausted
    /// budget). Further redeliveries are pointless.
    DeadLettered(DeliveryRecord),

    /// Nothing ran: the record is already in flight or terminal. The
    /// idempotent acceptance case.
    AlreadyAccepted(DeliveryRecord),
}

impl IngestOutcome {
    /// The delivery record as of this outcome.
    pub fn record(&self) -> &DeliveryRecord {
        match self {
            Self::Processed(r) | Self::Retrying(r) | Self::DeadLettered(r)
            | Self::AlreadyAccepted(r) => r,
        }
    }
}

/// Runs deliveries through claim, dispatch, emission, and commit.
pub struct Processor {
    ledger: Arc<dyn Ledger>,
    registry: Arc<HandlerRegistry>,
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Processor {
    /// Creates a processor over the shared ledger and handler registry.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn EventSink>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { ledger, registry, sink, policy, clock }
    }

    /// Ingests one authenticated delivery.
    ///
    /// Looks the record up (creating it on first sight), takes the claim if
    /// it is pending, and runs a processing attempt. Redeliveries of
    /// in-flight or terminal records short-circuit to
    /// [`IngestOutcome::AlreadyAccepted`] without touching the handler.
    pub async fn ingest(&self, delivery: NewDelivery) -> Result<IngestOutcome> {
        let (record, is_new) = self.ledger.lookup_or_create(delivery).await?;

        debug!(
            delivery_id = %record.delivery_id,
            event_type = %record.event_type,
            is_new,
            status = %record.status,
            "delivery entered ledger"
        );

        if record.status != DeliveryStatus::Pending {
            return Ok(IngestOutcome::AlreadyAccepted(record));
        }

        let claim_result = self.ledger.claim(&record.delivery_id).await;
        let claimed = match claim_result {
            Ok(claimed) => claimed,
            Err(CoreError::AlreadyClaimed { id, status }) => {
                // Lost the race to a concurrent worker. Report whatever the
                // record looks like now; the winner owns the state.
                debug!(delivery_id = %id, status = %status, "claim contention, accepting as no-op");
                let current = self.ledger.find(&id).await?.unwrap_or(record);
                return Ok(IngestOutcome::AlreadyAccepted(current));
            },
            Err(e) => return Err(e),
        };

        self.run_attempt(claimed).await
    }

    /// Replays a dead-lettered delivery.
    ///
    /// Resets the record to pending (history preserved) and immediately runs
    /// a processing attempt in the calling context — with no internal
    /// scheduler, the replay request is the worker.
    pub async fn replay(&self, id: &DeliveryId) -> Result<IngestOutcome> {
        let record = self.ledger.replay(id).await?;

        info!(
            delivery_id = %record.delivery_id,
            attempt_count = record.attempt_count,
            "replaying dead-lettered delivery"
        );

        let claim_result = self.ledger.claim(&record.delivery_id).await;
        let claimed = match claim_result {
            Ok(claimed) => claimed,
            Err(CoreError::AlreadyClaimed { id, .. }) => {
                let current = self.ledger.find(&id).await?.unwrap_or(record);
                return Ok(IngestOutcome::AlreadyAccepted(current));
            },
            Err(e) => return Err(e),
        };

        self.run_attempt(claimed).await
    }

    /// Runs one claimed attempt: dispatch, emit, commit.
    async fn run_attempt(&self, record: DeliveryRecord) -> Result<IngestOutcome> {
        let Some(handler) = self.registry.get(&record.event_type) else {
            // Structural failure: no redelivery can ever find a handler, so
            // the retry budget is not consumed.
            let reason = format!("no handler registered for event type '{}'", record.event_type);
            warn!(delivery_id = %record.delivery_id, event_type = %record.event_type, "{reason}");

            let dead = self.ledger.dead_letter(&record.delivery_id, &reason).await?;
            self.emit_dead_lettered(&dead).await;
            return Ok(IngestOutcome::DeadLettered(dead));
        };

        // Emission shares the attempt envelope: a delivered handler result
        // that fails to reach the event bus is a failed attempt, and handler
        // idempotency absorbs the re-execution.
        let attempt = match handler.handle(&record).await {
            Ok(()) => {
                let event = DeliveryEvent::processed(&record, self.clock.now_utc());
                self.sink
                    .emit(event)
                    .await
                    .map_err(|e| HandlerError::transient(e.to_string()))
            },
            Err(e) => Err(e),
        };

        match attempt {
            Ok(()) => {
                let succeeded = self.ledger.commit_success(&record.delivery_id).await?;
                info!(
                    delivery_id = %succeeded.delivery_id,
                    event_type = %succeeded.event_type,
                    attempt_count = succeeded.attempt_count,
                    "delivery processed"
                );
                Ok(IngestOutcome::Processed(succeeded))
            },
            Err(failure) => {
                let attempt_count = u32::try_from(record.attempt_count).unwrap_or(u32::MAX);

                match self.policy.decide(attempt_count, &failure) {
                    RetryDecision::Retry => {
                        let released = self
                            .ledger
                            .release_for_retry(&record.delivery_id, &failure.to_string())
                            .await?;
                        warn!(
                            delivery_id = %released.delivery_id,
                            attempt_count = released.attempt_count,
                            error = %failure,
                            "attempt failed, awaiting redelivery"
                        );
                        Ok(IngestOutcome::Retrying(released))
                    },
                    RetryDecision::DeadLetter { reason } => {
                        let dead = self
                            .ledger
                            .dead_letter(&record.delivery_id, &failure.to_string())
                            .await?;
                        error!(
                            delivery_id = %dead.delivery_id,
                            attempt_count = dead.attempt_count,
                            reason = %reason,
                            "delivery dead-lettered"
                        );
                        self.emit_dead_lettered(&dead).await;
                        Ok(IngestOutcome::DeadLettered(dead))
                    },
                }
            },
        }
    }

    /// Best-effort dead-letter notification; never blocks the transition.
    async fn emit_dead_lettered(&self, record: &DeliveryRecord) {
        let event = DeliveryEvent::dead_lettered(record, self.clock.now_utc());
        if let Err(e) = self.sink.emit(event).await {
            warn!(delivery_id = %record.delivery_id, error = %e, "dead-letter event emission failed");
        }
    }
}
