//! Scenario: Expiry Marker runs on both sides of a served checkpoint, then the
//! Serving Advancer catches up.
//!
//! # Invariants under test
//!
//! 1. A frontier moved by the marker never makes the Advancer fault; the span
//!    a checkpoint closes opens at the checkpoint below it.
//! 2. Every checkpoint the marker flagged past is still credited once.
//! 3. Later Advancer passes keep absorbing fresh spans.

use std::sync::Arc;

use chrono::{Duration, Utc};
use vwr_reconcile::memory::{InMemoryFrontierCache, InMemoryLedger};
use vwr_reconcile::{
    advance_serving_counter, mark_expired_positions, CounterKey, EventContext, EventId,
    ExpiryOutcome, FrontierCache, Frontiers, ServingCheckpoint, StopReason,
};

fn evt() -> EventId {
    EventId::new("evt-interleave").unwrap()
}

#[tokio::test]
async fn marker_around_served_checkpoint_then_advancer_keeps_crediting() {
    let now = Utc::now();
    let old = now - Duration::hours(2);

    let cache = Arc::new(InMemoryFrontierCache::with_frontiers(Frontiers {
        queue_counter: 40,
        serving_counter: 10,
        max_expired: 0,
    }));
    let ledger = Arc::new(InMemoryLedger::new());
    for p in 1..=40 {
        ledger.issue_position(&evt(), p, now - Duration::hours(3));
    }
    ledger.append_checkpoint(ServingCheckpoint::fresh(evt(), 10, old));
    let ctx = EventContext::new(evt(), Duration::minutes(15), cache.clone(), ledger.clone());

    // [0, 10): positions 1..=9 flagged; the frontier stops below checkpoint 10.
    let first = mark_expired_positions(&ctx, now).await.expect("first marker pass");
    assert_eq!(first.outcome, ExpiryOutcome::Advanced);
    assert_eq!(first.flagged, 9);
    assert_eq!(cache.peek(CounterKey::MaxExpiredFrontier), Some(9));

    // Five clients are served.
    let serving = cache
        .incr_by(CounterKey::ServingCounter, 5)
        .await
        .expect("serve");
    assert_eq!(serving, 15);
    ledger.append_checkpoint(ServingCheckpoint {
        event_id: evt(),
        serving_counter: 15,
        issue_time: old,
        positions_served: 5,
    });

    // [9, 15): positions 10..=14 flagged; checkpoint 10 is still unabsorbed.
    let second = mark_expired_positions(&ctx, now).await.expect("second marker pass");
    assert_eq!(second.flagged, 5);
    assert_eq!(
        second.outcome,
        ExpiryOutcome::HeldBelowCheckpoint { checkpoint: 10 }
    );
    assert_eq!(cache.peek(CounterKey::MaxExpiredFrontier), Some(9));

    // Checkpoint 10 closes (0, 10] for 10; checkpoint 15 closes (10, 15],
    // fully served. The appended checkpoint 25 is fresh.
    let pass = advance_serving_counter(&ctx, now).await.expect("advance at now");
    let credits: Vec<(i64, i64)> = pass
        .applied
        .iter()
        .map(|a| (a.checkpoint, a.increment_by))
        .collect();
    assert_eq!(credits, vec![(10, 10), (15, 0)]);
    assert!(matches!(
        pass.stop,
        StopReason::WithinWindow { checkpoint: 25, .. }
    ));
    assert_eq!(cache.peek(CounterKey::MaxExpiredFrontier), Some(15));
    assert_eq!(cache.peek(CounterKey::ServingCounter), Some(25));

    let pass = advance_serving_counter(&ctx, now + Duration::minutes(30))
        .await
        .expect("advance at +30m");
    assert_eq!(pass.applied.len(), 1);
    assert_eq!(pass.applied[0].increment_by, 10);
    assert_eq!(cache.peek(CounterKey::MaxExpiredFrontier), Some(25));
    assert_eq!(cache.peek(CounterKey::ServingCounter), Some(35));

    let pass = advance_serving_counter(&ctx, now + Duration::minutes(60))
        .await
        .expect("advance at +60m");
    assert_eq!(pass.applied.len(), 1);
    assert_eq!(
        pass.stop,
        StopReason::NotYetIssued {
            checkpoint: 45,
            queue_counter: 40
        }
    );
    assert_eq!(cache.peek(CounterKey::MaxExpiredFrontier), Some(35));
    assert_eq!(cache.peek(CounterKey::ServingCounter), Some(45));
}
