//! Lifecycle tests for the delivery processor.
//!
//! Drives the processor against the in-memory ledger and a recording sink,
//! covering idempotency, retry exhaustion, unknown event types, and replay.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use inlet_core::{
    CoreError, DeliveryEvent, DeliveryId, DeliveryRecord, DeliveryStatus, EmitError, EventSink,
    Ledger, MemoryLedger, NewDelivery, RecordingSink, SystemClock,
};
use inlet_engine::{
    DeliveryHandler, HandlerError, HandlerRegistry, IngestOutcome, Processor, RetryPolicy,
};

/// Handler that fails the first `failures` calls, then succeeds.
#[derive(Debug)]
struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    fn new(failures: usize) -> Self {
        Self { failures, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeliveryHandler for FlakyHandler {
    async fn handle(&self, _delivery: &DeliveryRecord) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(HandlerError::transient("downstream dependency unavailable"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct PermanentFailureHandler;

#[async_trait::async_trait]
impl DeliveryHandler for PermanentFailureHandler {
    async fn handle(&self, _delivery: &DeliveryRecord) -> Result<(), HandlerError> {
        Err(HandlerError::permanent("payload is structurally invalid"))
    }
}

/// Sink whose emissions fail until released.
#[derive(Debug)]
struct UnreliableSink {
    failures_left: AtomicUsize,
}

#[async_trait::async_trait]
impl EventSink for UnreliableSink {
    async fn emit(&self, _event: DeliveryEvent) -> Result<(), EmitError> {
        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(EmitError("event bus unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    sink: Arc<RecordingSink>,
    processor: Processor,
}

fn harness(max_attempts: u32, setup: impl FnOnce(&mut HandlerRegistry)) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let sink = Arc::new(RecordingSink::new());
    let mut registry = HandlerRegistry::new();
    setup(&mut registry);

    let processor = Processor::new(
        ledger.clone(),
        Arc::new(registry),
        sink.clone(),
        RetryPolicy::new(max_attempts),
        Arc::new(SystemClock::new()),
    );

    Harness { ledger, sink, processor }
}

fn delivery(id: &str, event_type: &str) -> NewDelivery {
    NewDelivery {
        delivery_id: DeliveryId::new(id),
        event_type: event_type.to_string(),
        payload: br#"{"session":"s-9"}"#.to_vec(),
        content_type: "application/json".to_string(),
    }
}

#[tokio::test]
async fn successful_delivery_processes_once_and_emits_once() {
    let handler = Arc::new(FlakyHandler::new(0));
    let env = harness(3, |r| r.register("x.completed", handler.clone()));

    let outcome = env.processor.ingest(delivery("d-1", "x.completed")).await.unwrap();

    let record = match outcome {
        IngestOutcome::Processed(r) => r,
        other => panic!("expected Processed, got {other:?}"),
    };
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(handler.calls(), 1);

    let events = env.sink.events().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DeliveryEvent::Processed(_)));
}

#[tokio::test]
async fn redelivery_after_success_is_a_no_op() {
    let handler = Arc::new(FlakyHandler::new(0));
    let env = harness(3, |r| r.register("x.completed", handler.clone()));

    env.processor.ingest(delivery("d-2", "x.completed")).await.unwrap();
    let outcome = env.processor.ingest(delivery("d-2", "x.completed")).await.unwrap();

    assert!(matches!(outcome, IngestOutcome::AlreadyAccepted(_)));
    assert_eq!(outcome.record().status, DeliveryStatus::Succeeded);
    assert_eq!(handler.calls(), 1, "handler must run exactly once");
    assert_eq!(env.sink.len().await, 1, "exactly one domain event");
}

#[tokio::test]
async fn flaky_handler_walks_the_documented_state_sequence() {
    // Fails twice, succeeds on the third attempt, max_attempts = 3.
    let handler = Arc::new(FlakyHandler::new(2));
    let env = harness(3, |r| r.register("x.completed", handler.clone()));
    let id = DeliveryId::new("d-3");

    let first = env.processor.ingest(delivery("d-3", "x.completed")).await.unwrap();
    assert!(matches!(first, IngestOutcome::Retrying(_)));
    assert_eq!(first.record().status, DeliveryStatus::Pending);
    assert_eq!(first.record().attempt_count, 1);

    let second = env.processor.ingest(delivery("d-3", "x.completed")).await.unwrap();
    assert!(matches!(second, IngestOutcome::Retrying(_)));
    assert_eq!(second.record().attempt_count, 2);

    let third = env.processor.ingest(delivery("d-3", "x.completed")).await.unwrap();
    assert!(matches!(third, IngestOutcome::Processed(_)));

    let final_record = env.ledger.find(&id).await.unwrap().unwrap();
    assert_eq!(final_record.status, DeliveryStatus::Succeeded);
    assert_eq!(final_record.attempt_count, 3);
}

#[tokio::test]
async fn always_failing_handler_dead_letters_after_exactly_max_attempts() {
    let handler = Arc::new(FlakyHandler::new(usize::MAX));
    let env = harness(3, |r| r.register("x.completed", handler.clone()));
    let id = DeliveryId::new("d-4");

    for attempt in 1..=2 {
        let outcome = env.processor.ingest(delivery("d-4", "x.completed")).await.unwrap();
        assert!(
            matches!(outcome, IngestOutcome::Retrying(_)),
            "attempt {attempt} must stay retryable"
        );
        assert_eq!(
            env.ledger.find(&id).await.unwrap().unwrap().status,
            DeliveryStatus::Pending,
            "never dead-lettered before the budget is spent"
        );
    }

    let last = env.processor.ingest(delivery("d-4", "x.completed")).await.unwrap();
    assert!(matches!(last, IngestOutcome::DeadLettered(_)));

    let record = env.ledger.find(&id).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::DeadLettered);
    assert_eq!(record.attempt_count, 3);
    assert!(record.last_error.as_deref().unwrap_or("").contains("unavailable"));
}

#[tokio::test]
async fn unknown_event_type_dead_letters_on_first_attempt() {
    let env = harness(3, |_| {});

    let outcome = env.processor.ingest(delivery("d-5", "nobody.handles.this")).await.unwrap();

    let record = match outcome {
        IngestOutcome::DeadLettered(r) => r,
        other => panic!("expected DeadLettered, got {other:?}"),
    };
    assert_eq!(record.attempt_count, 1, "retry budget must not be consumed");
    assert!(record.last_error.as_deref().unwrap_or("").contains("no handler registered"));

    // Only the best-effort dead-letter notification, no Processed event.
    let events = env.sink.events().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DeliveryEvent::Failed(_)));
}

#[tokio::test]
async fn permanent_handler_failure_skips_the_retry_budget() {
    let env = harness(5, |r| r.register("x.completed", Arc::new(PermanentFailureHandler)));

    let outcome = env.processor.ingest(delivery("d-6", "x.completed")).await.unwrap();

    assert!(matches!(outcome, IngestOutcome::DeadLettered(_)));
    assert_eq!(outcome.record().attempt_count, 1);
}

#[tokio::test]
async fn replay_runs_an_attempt_and_preserves_history() {
    // Exhaust the budget with two failures... then the third (replayed)
    // attempt succeeds.
    let handler = Arc::new(FlakyHandler::new(2));
    let env = harness(2, |r| r.register("x.completed", handler.clone()));
    let id = DeliveryId::new("d-7");

    env.processor.ingest(delivery("d-7", "x.completed")).await.unwrap();
    env.processor.ingest(delivery("d-7", "x.completed")).await.unwrap();
    assert_eq!(env.ledger.find(&id).await.unwrap().unwrap().status, DeliveryStatus::DeadLettered);

    let outcome = env.processor.replay(&id).await.unwrap();

    let record = match outcome {
        IngestOutcome::Processed(r) => r,
        other => panic!("expected Processed after replay, got {other:?}"),
    };
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert_eq!(record.attempt_count, 3, "replay attempt extends the history");
}

#[tokio::test]
async fn replay_rejects_records_that_are_not_dead_lettered() {
    let env = harness(3, |r| r.register("x.completed", Arc::new(FlakyHandler::new(0))));

    env.processor.ingest(delivery("d-8", "x.completed")).await.unwrap();

    let err = env.processor.replay(&DeliveryId::new("d-8")).await.unwrap_err();
    assert!(matches!(err, CoreError::NotDeadLettered { .. }));

    let err = env.processor.replay(&DeliveryId::new("missing")).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn failed_event_emission_fails_the_attempt() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut registry = HandlerRegistry::new();
    let handler = Arc::new(FlakyHandler::new(0));
    registry.register("x.completed", handler.clone());

    // Sink fails once, then recovers.
    let sink = Arc::new(UnreliableSink { failures_left: AtomicUsize::new(1) });
    let processor = Processor::new(
        ledger.clone(),
        Arc::new(registry),
        sink,
        RetryPolicy::new(3),
        Arc::new(SystemClock::new()),
    );
    let id = DeliveryId::new("d-9");

    let first = processor.ingest(delivery("d-9", "x.completed")).await.unwrap();
    assert!(
        matches!(first, IngestOutcome::Retrying(_)),
        "emission failure keeps the attempt inside the retry envelope"
    );
    assert_eq!(first.record().status, DeliveryStatus::Pending);

    let second = processor.ingest(delivery("d-9", "x.completed")).await.unwrap();
    assert!(matches!(second, IngestOutcome::Processed(_)));
    assert_eq!(ledger.find(&id).await.unwrap().unwrap().status, DeliveryStatus::Succeeded);
    // Handler ran twice; it is required to be idempotent for exactly this case.
    assert_eq!(handler.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_of_one_delivery_runs_the_handler_once() {
    let handler = Arc::new(FlakyHandler::new(0));
    let env = harness(3, |r| r.register("x.completed", handler.clone()));
    let processor = Arc::new(env.processor);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let processor = processor.clone();
        tasks.push(tokio::spawn(async move {
            processor.ingest(delivery("d-10", "x.completed")).await
        }));
    }

    let mut processed = 0;
    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            IngestOutcome::Processed(_) => processed += 1,
            IngestOutcome::AlreadyAccepted(_) => accepted += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(processed, 1, "exactly one request reaches the handler");
    assert_eq!(accepted, 7);
    assert_eq!(handler.calls(), 1);
    assert_eq!(env.sink.len().await, 1);
}
