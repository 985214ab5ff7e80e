//! Integration tests for delivery ledger semantics.
//!
//! Exercises the in-memory backend, which shares the trait contract with the
//! PostgreSQL backend: atomic lookup-or-create, claim-as-lock, guarded state
//! transitions, and dead-letter management.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use inlet_core::{
    Clock, CoreError, DeliveryId, DeliveryStatus, DlqFilter, Ledger, MemoryLedger, NewDelivery,
    TestClock,
};

fn delivery(id: &str, event_type: &str) -> NewDelivery {
    NewDelivery {
        delivery_id: DeliveryId::new(id),
        event_type: event_type.to_string(),
        payload: br#"{"amount":42}"#.to_vec(),
        content_type: "application/json".to_string(),
    }
}

#[tokio::test]
async fn lookup_or_create_is_idempotent() {
    let ledger = MemoryLedger::new();

    let (first, is_new) = ledger.lookup_or_create(delivery("d-1", "x.completed")).await.unwrap();
    assert!(is_new);
    assert_eq!(first.status, DeliveryStatus::Pending);
    assert_eq!(first.attempt_count, 0);

    let (second, is_new) = ledger.lookup_or_create(delivery("d-1", "x.completed")).await.unwrap();
    assert!(!is_new);
    assert_eq!(second.delivery_id, first.delivery_id);
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn claim_increments_attempt_count_and_locks() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-2");
    ledger.lookup_or_create(delivery("d-2", "x.completed")).await.unwrap();

    let claimed = ledger.claim(&id).await.unwrap();
    assert_eq!(claimed.status, DeliveryStatus::Processing);
    assert_eq!(claimed.attempt_count, 1);

    // A second claim on the same record must observe the lock.
    let err = ledger.claim(&id).await.unwrap_err();
    match err {
        CoreError::AlreadyClaimed { status, .. } => {
            assert_eq!(status, DeliveryStatus::Processing);
        },
        other => panic!("expected AlreadyClaimed, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_grant_exactly_one() {
    let ledger = Arc::new(MemoryLedger::new());
    let id = DeliveryId::new("d-race");
    ledger.lookup_or_create(delivery("d-race", "x.completed")).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { ledger.claim(&id).await }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1, "exactly one concurrent claim may win");
    let record = ledger.find(&id).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn succeeded_records_never_transition_again() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-3");
    ledger.lookup_or_create(delivery("d-3", "x.completed")).await.unwrap();
    ledger.claim(&id).await.unwrap();

    let record = ledger.commit_success(&id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert!(record.last_error.is_none());

    assert!(matches!(ledger.claim(&id).await, Err(CoreError::AlreadyClaimed { .. })));
    assert!(matches!(
        ledger.dead_letter(&id, "late failure").await,
        Err(CoreError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn release_for_retry_returns_record_to_pending() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-4");
    ledger.lookup_or_create(delivery("d-4", "x.completed")).await.unwrap();
    ledger.claim(&id).await.unwrap();

    let record = ledger.release_for_retry(&id, "downstream timeout").await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.last_error.as_deref(), Some("downstream timeout"));
    assert_eq!(record.attempt_count, 1);

    // Eligible for another claim; the attempt count keeps growing.
    let reclaimed = ledger.claim(&id).await.unwrap();
    assert_eq!(reclaimed.attempt_count, 2);
}

#[tokio::test]
async fn replay_preserves_attempt_history_and_clears_error() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-5");
    ledger.lookup_or_create(delivery("d-5", "x.completed")).await.unwrap();

    for _ in 0..3 {
        ledger.claim(&id).await.unwrap();
        if ledger.find(&id).await.unwrap().unwrap().attempt_count < 3 {
            ledger.release_for_retry(&id, "boom").await.unwrap();
        } else {
            ledger.dead_letter(&id, "boom").await.unwrap();
        }
    }

    let dead = ledger.find(&id).await.unwrap().unwrap();
    assert_eq!(dead.status, DeliveryStatus::DeadLettered);
    assert_eq!(dead.attempt_count, 3);

    let replayed = ledger.replay(&id).await.unwrap();
    assert_eq!(replayed.status, DeliveryStatus::Pending);
    assert_eq!(replayed.attempt_count, 3, "replay must not reset history");
    assert!(replayed.last_error.is_none());
}

#[tokio::test]
async fn replay_rejects_records_that_are_not_dead_lettered() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-6");
    ledger.lookup_or_create(delivery("d-6", "x.completed")).await.unwrap();

    assert!(matches!(ledger.replay(&id).await, Err(CoreError::NotDeadLettered { .. })));
    assert!(matches!(
        ledger.replay(&DeliveryId::new("missing")).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn purge_only_removes_dead_lettered_records() {
    let ledger = MemoryLedger::new();
    let id = DeliveryId::new("d-7");
    ledger.lookup_or_create(delivery("d-7", "x.completed")).await.unwrap();

    assert!(matches!(ledger.purge(&id).await, Err(CoreError::NotDeadLettered { .. })));

    ledger.claim(&id).await.unwrap();
    ledger.dead_letter(&id, "no handler").await.unwrap();

    ledger.purge(&id).await.unwrap();
    assert!(ledger.find(&id).await.unwrap().is_none());
    assert!(matches!(ledger.purge(&id).await, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn dead_letter_listing_filters_by_event_type_and_limit() {
    let ledger = MemoryLedger::new();

    for (id, event_type) in
        [("a-1", "a.created"), ("a-2", "a.created"), ("b-1", "b.created"), ("ok-1", "a.created")]
    {
        let delivery_id = DeliveryId::new(id);
        ledger.lookup_or_create(delivery(id, event_type)).await.unwrap();
        ledger.claim(&delivery_id).await.unwrap();
        if id == "ok-1" {
            ledger.commit_success(&delivery_id).await.unwrap();
        } else {
            ledger.dead_letter(&delivery_id, "boom").await.unwrap();
        }
    }

    let all = ledger.list_dead_lettered(&DlqFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let only_a = ledger
        .list_dead_lettered(&DlqFilter {
            event_type: Some("a.created".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(only_a.len(), 2);

    let capped = ledger
        .list_dead_lettered(&DlqFilter { limit: 1, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(capped.len(), 1);
}

#[tokio::test]
async fn dead_letter_listing_filters_by_time_range() {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(TestClock::starting_at(start));
    let ledger = MemoryLedger::with_clock(clock.clone());

    for (id, offset_minutes) in [("old-1", 0i64), ("new-1", 60)] {
        clock.set(start + Duration::minutes(offset_minutes));
        let delivery_id = DeliveryId::new(id);
        ledger.lookup_or_create(delivery(id, "x.completed")).await.unwrap();
        ledger.claim(&delivery_id).await.unwrap();
        ledger.dead_letter(&delivery_id, "boom").await.unwrap();
    }

    let recent = ledger
        .list_dead_lettered(&DlqFilter {
            since: Some(start + Duration::minutes(30)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].delivery_id.as_str(), "new-1");

    let early = ledger
        .list_dead_lettered(&DlqFilter {
            until: Some(start + Duration::minutes(30)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].delivery_id.as_str(), "old-1");
}

#[tokio::test]
async fn stale_processing_claims_are_recovered() {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(TestClock::starting_at(start));
    let ledger = MemoryLedger::with_clock(clock.clone());

    let stuck = DeliveryId::new("stuck");
    ledger.lookup_or_create(delivery("stuck", "x.completed")).await.unwrap();
    ledger.claim(&stuck).await.unwrap();

    // A fresh claim made after the clock advances must survive the sweep.
    clock.advance(Duration::minutes(10));
    let fresh = DeliveryId::new("fresh");
    ledger.lookup_or_create(delivery("fresh", "x.completed")).await.unwrap();
    ledger.claim(&fresh).await.unwrap();

    let threshold = clock.now_utc() - Duration::minutes(5);
    let recovered = ledger.recover_stale(threshold).await.unwrap();

    assert_eq!(recovered, 1);
    assert_eq!(ledger.find(&stuck).await.unwrap().unwrap().status, DeliveryStatus::Pending);
    assert_eq!(ledger.find(&fresh).await.unwrap().unwrap().status, DeliveryStatus::Processing);
}
