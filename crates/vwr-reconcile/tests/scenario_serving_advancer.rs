//! Scenario: Serving Advancer absorbs expired spans.
//!
//! # Invariants under test
//!
//! 1. An eligible checkpoint moves `max_queue_position_expired` to its value,
//!    credits `serving_counter` with the un-served span width and appends a
//!    fresh checkpoint at the new counter value.
//! 2. A checkpoint still inside the expiry window ends the pass before any
//!    later checkpoint is evaluated, even an expired one.
//! 3. A checkpoint whose position is missing from the ledger halts the pass;
//!    earlier absorbed checkpoints stay absorbed.
//! 4. Negative credit is never applied.
//! 5. A frontier moved by a concurrent run ends the pass before any write.
//!
//! All tests are pure in-process against the in-memory stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use vwr_reconcile::memory::{InMemoryFrontierCache, InMemoryLedger};
use vwr_reconcile::{
    advance_serving_counter, CasOutcome, CounterKey, EventContext, EventId, FaultKind,
    FrontierCache, Frontiers, Inconsistency, ReconcileError, ServingCheckpoint, StopReason,
    StoreError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    ctx: EventContext,
    cache: Arc<InMemoryFrontierCache>,
    ledger: Arc<InMemoryLedger>,
    now: DateTime<Utc>,
}

fn evt() -> EventId {
    EventId::new("evt-advancer").unwrap()
}

fn harness(frontiers: Frontiers) -> Harness {
    let cache = Arc::new(InMemoryFrontierCache::with_frontiers(frontiers));
    let ledger = Arc::new(InMemoryLedger::new());
    let ctx = EventContext::new(evt(), Duration::minutes(15), cache.clone(), ledger.clone());
    Harness {
        ctx,
        cache,
        ledger,
        now: Utc::now(),
    }
}

impl Harness {
    fn long_ago(&self) -> DateTime<Utc> {
        self.now - Duration::hours(2)
    }

    fn recent(&self) -> DateTime<Utc> {
        self.now - Duration::minutes(1)
    }

    fn checkpoint(&self, value: i64, served: i64, at: DateTime<Utc>) {
        self.ledger.append_checkpoint(ServingCheckpoint {
            event_id: evt(),
            serving_counter: value,
            issue_time: at,
            positions_served: served,
        });
    }

    fn counter(&self, key: CounterKey) -> i64 {
        self.cache.peek(key).expect("counter seeded")
    }

    fn checkpoint_values(&self) -> Vec<i64> {
        self.ledger
            .checkpoints(&evt())
            .iter()
            .map(|c| c.serving_counter)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 1. Simple skip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_skip_credits_full_span_and_appends_checkpoint() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.checkpoint(10, 0, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert_eq!(pass.applied.len(), 1);
    assert_eq!(pass.applied[0].increment_by, 10);
    assert_eq!(pass.applied[0].new_checkpoint, Some(20));
    assert_eq!(pass.stop, StopReason::Exhausted);

    assert_eq!(h.counter(CounterKey::ServingCounter), 20);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 10);

    let appended = h
        .ledger
        .checkpoints(&evt())
        .into_iter()
        .find(|c| c.serving_counter == 20)
        .expect("new checkpoint appended");
    assert_eq!(appended.positions_served, 0);
    assert_eq!(appended.issue_time, h.now);
}

// ---------------------------------------------------------------------------
// 2. Not yet eligible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recent_checkpoint_mutates_nothing() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.checkpoint(10, 0, h.recent());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert!(pass.applied.is_empty());
    assert!(matches!(
        pass.stop,
        StopReason::WithinWindow { checkpoint: 10, .. }
    ));
    assert_eq!(h.counter(CounterKey::ServingCounter), 10);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 0);
    assert_eq!(h.checkpoint_values(), vec![10]);
}

#[tokio::test]
async fn recently_issued_position_keeps_old_checkpoint_ineligible() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    // time_in_queue is the later of the two instants.
    h.ledger.issue_position(&evt(), 10, h.recent());
    h.checkpoint(10, 0, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert!(pass.applied.is_empty());
    assert_eq!(h.counter(CounterKey::ServingCounter), 10);
}

// ---------------------------------------------------------------------------
// Early exit ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn early_exit_never_skips_past_an_ineligible_checkpoint() {
    let h = harness(Frontiers {
        queue_counter: 40,
        serving_counter: 20,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.ledger.issue_position(&evt(), 20, h.long_ago());
    h.checkpoint(10, 0, h.recent());
    h.checkpoint(20, 0, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert!(pass.applied.is_empty());
    assert!(matches!(
        pass.stop,
        StopReason::WithinWindow { checkpoint: 10, .. }
    ));
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 0);
    assert_eq!(h.counter(CounterKey::ServingCounter), 20);
}

#[tokio::test]
async fn consecutive_eligible_checkpoints_credit_each_span() {
    let h = harness(Frontiers {
        queue_counter: 60,
        serving_counter: 20,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.ledger.issue_position(&evt(), 20, h.long_ago());
    h.checkpoint(10, 2, h.long_ago());
    h.checkpoint(20, 0, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    let credits: Vec<i64> = pass.applied.iter().map(|a| a.increment_by).collect();
    assert_eq!(credits, vec![8, 10]);
    assert_eq!(h.counter(CounterKey::ServingCounter), 38);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 20);
    assert_eq!(h.checkpoint_values(), vec![10, 20, 28, 38]);
}

#[tokio::test]
async fn frontier_inside_span_credits_from_checkpoint_below() {
    let h = harness(Frontiers {
        queue_counter: 40,
        serving_counter: 15,
        max_expired: 14,
    });
    h.ledger.issue_position(&evt(), 15, h.long_ago());
    h.checkpoint(10, 0, h.long_ago());
    h.checkpoint(15, 5, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    // (10, 15] with five served: nothing to credit, no fault.
    assert_eq!(pass.applied.len(), 1);
    assert_eq!(pass.applied[0].increment_by, 0);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 15);
    assert_eq!(h.counter(CounterKey::ServingCounter), 15);
}

// ---------------------------------------------------------------------------
// 3. Missing position record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_position_halts_and_keeps_prior_progress() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 20,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.checkpoint(10, 0, h.long_ago());
    h.checkpoint(20, 0, h.long_ago()); // position 20 never recorded

    let err = advance_serving_counter(&h.ctx, h.now)
        .await
        .expect_err("missing position must surface");

    assert_eq!(err.kind(), FaultKind::InconsistentState);
    assert!(matches!(
        err,
        ReconcileError::Inconsistent {
            detail: Inconsistency::MissingPosition { checkpoint: 20, .. },
            ..
        }
    ));

    // checkpoint 10 was absorbed before the halt.
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 10);
    assert_eq!(h.counter(CounterKey::ServingCounter), 30);
    assert_eq!(h.checkpoint_values(), vec![10, 20, 30]);
}

#[tokio::test]
async fn checkpoint_past_queue_counter_is_not_a_fault() {
    let h = harness(Frontiers {
        queue_counter: 15,
        serving_counter: 20,
        max_expired: 0,
    });
    h.checkpoint(20, 0, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert_eq!(
        pass.stop,
        StopReason::NotYetIssued {
            checkpoint: 20,
            queue_counter: 15
        }
    );
    assert_eq!(h.counter(CounterKey::ServingCounter), 20);
}

// ---------------------------------------------------------------------------
// 4. Credit faults and edge credits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negative_credit_is_refused_without_mutation() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.checkpoint(10, 11, h.long_ago());

    let err = advance_serving_counter(&h.ctx, h.now)
        .await
        .expect_err("negative credit must surface");

    assert_eq!(err.kind(), FaultKind::InconsistentState);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 0);
    assert_eq!(h.counter(CounterKey::ServingCounter), 10);
    assert_eq!(h.checkpoint_values(), vec![10]);
}

#[tokio::test]
async fn fully_served_span_moves_frontier_only() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.checkpoint(10, 10, h.long_ago());

    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");

    assert_eq!(pass.applied[0].increment_by, 0);
    assert_eq!(pass.applied[0].new_checkpoint, None);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 10);
    assert_eq!(h.counter(CounterKey::ServingCounter), 10);
    let stored = h.ledger.checkpoints(&evt());
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].positions_served, 10);
}

// ---------------------------------------------------------------------------
// Re-runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_checkpoints_is_no_work() {
    let h = harness(Frontiers {
        queue_counter: 5,
        serving_counter: 5,
        max_expired: 5,
    });
    let pass = advance_serving_counter(&h.ctx, h.now).await.expect("pass");
    assert!(pass.is_no_work());
}

#[tokio::test]
async fn rerun_at_same_instant_does_not_advance_again() {
    let h = harness(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    });
    h.ledger.issue_position(&evt(), 10, h.long_ago());
    h.ledger.issue_position(&evt(), 20, h.long_ago());
    h.checkpoint(10, 0, h.long_ago());

    advance_serving_counter(&h.ctx, h.now).await.expect("first pass");
    let second = advance_serving_counter(&h.ctx, h.now).await.expect("second pass");

    // The appended checkpoint at 20 was written at `now`; still in window.
    assert!(second.applied.is_empty());
    assert_eq!(h.counter(CounterKey::ServingCounter), 20);
    assert_eq!(h.counter(CounterKey::MaxExpiredFrontier), 10);
}

// ---------------------------------------------------------------------------
// 5. Overlapping runs
// ---------------------------------------------------------------------------

/// Cache wrapper that lets a simulated concurrent Advancer absorb the same
/// checkpoint right before this run's compare-and-set lands.
struct RacingCache {
    inner: Arc<InMemoryFrontierCache>,
    race_pending: AtomicBool,
}

#[async_trait]
impl FrontierCache for RacingCache {
    async fn get(&self, key: CounterKey) -> Result<i64, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: CounterKey, value: i64) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn incr_by(&self, key: CounterKey, delta: i64) -> Result<i64, StoreError> {
        self.inner.incr_by(key, delta).await
    }

    async fn compare_and_set(
        &self,
        key: CounterKey,
        expected: i64,
        new: i64,
    ) -> Result<CasOutcome, StoreError> {
        if self.race_pending.swap(false, Ordering::SeqCst) {
            self.inner.compare_and_set(key, expected, new).await?;
        }
        self.inner.compare_and_set(key, expected, new).await
    }
}

#[tokio::test]
async fn concurrent_frontier_move_ends_pass_without_writes() {
    let now = Utc::now();
    let inner = Arc::new(InMemoryFrontierCache::with_frontiers(Frontiers {
        queue_counter: 25,
        serving_counter: 10,
        max_expired: 0,
    }));
    let racing = Arc::new(RacingCache {
        inner: inner.clone(),
        race_pending: AtomicBool::new(true),
    });
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.issue_position(&evt(), 10, now - Duration::hours(2));
    ledger.append_checkpoint(ServingCheckpoint::fresh(evt(), 10, now - Duration::hours(2)));
    let ctx = EventContext::new(evt(), Duration::minutes(15), racing, ledger.clone());

    let pass = advance_serving_counter(&ctx, now).await.expect("pass");

    assert_eq!(
        pass.stop,
        StopReason::Contended {
            expected: 0,
            actual: 10
        }
    );
    assert!(pass.applied.is_empty());
    assert_eq!(pass.frontier_after, 0);
    assert_eq!(pass.serving_after, 10);
    assert_eq!(inner.peek(CounterKey::ServingCounter), Some(10));
    let values: Vec<i64> = ledger
        .checkpoints(&evt())
        .iter()
        .map(|c| c.serving_counter)
        .collect();
    assert_eq!(values, vec![10]);
}
