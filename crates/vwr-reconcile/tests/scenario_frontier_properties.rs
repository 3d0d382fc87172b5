//! Scenario: frontier monotonicity and bounding across interleaved passes.
//!
//! Drives both components over simulated wall-clock time while clients are
//! served in between, and checks after every pass that neither frontier moved
//! backwards and that `max_queue_position_expired <= serving_counter`. Every
//! Advancer pass must succeed: spans closed by served checkpoints never yield
//! a negative credit, wherever the marker left the frontier.

use std::sync::Arc;

use chrono::{Duration, Utc};
use vwr_reconcile::memory::{InMemoryFrontierCache, InMemoryLedger};
use vwr_reconcile::{
    advance_serving_counter, mark_expired_positions, CounterKey, EventContext, EventId,
    FrontierCache, Frontiers, ServingCheckpoint,
};

fn evt() -> EventId {
    EventId::new("evt-properties").unwrap()
}

#[tokio::test]
async fn frontiers_are_monotonic_and_bounded() {
    let t0 = Utc::now() - Duration::hours(6);
    let cache = Arc::new(InMemoryFrontierCache::with_frontiers(Frontiers {
        queue_counter: 200,
        serving_counter: 10,
        max_expired: 0,
    }));
    let ledger = Arc::new(InMemoryLedger::new());
    for p in 1..=200 {
        ledger.issue_position(&evt(), p, t0);
    }
    ledger.append_checkpoint(ServingCheckpoint::fresh(evt(), 10, t0));
    let ctx = EventContext::new(evt(), Duration::minutes(15), cache.clone(), ledger.clone());

    let mut last_serving = 10;
    let mut last_frontier = 0;

    for step in 1..=24 {
        let now = t0 + Duration::minutes(10 * step);

        // Every third step the serving side lets five more clients through.
        if step % 3 == 0 {
            let serving = cache
                .incr_by(CounterKey::ServingCounter, 5)
                .await
                .expect("serve");
            ledger.append_checkpoint(ServingCheckpoint {
                event_id: evt(),
                serving_counter: serving,
                issue_time: now,
                positions_served: 5,
            });
        }

        mark_expired_positions(&ctx, now).await.expect("expiry pass");
        check(&cache, &mut last_serving, &mut last_frontier);

        advance_serving_counter(&ctx, now)
            .await
            .unwrap_or_else(|err| panic!("advance pass at step {step}: {err}"));
        check(&cache, &mut last_serving, &mut last_frontier);
    }

    assert!(last_serving > 10, "serving counter never advanced");
    assert!(last_frontier > 0, "frontier never advanced");
}

fn check(cache: &InMemoryFrontierCache, last_serving: &mut i64, last_frontier: &mut i64) {
    let serving = cache.peek(CounterKey::ServingCounter).unwrap();
    let frontier = cache.peek(CounterKey::MaxExpiredFrontier).unwrap();

    assert!(serving >= *last_serving, "serving counter decreased");
    assert!(frontier >= *last_frontier, "frontier decreased");
    assert!(
        frontier <= serving,
        "frontier {frontier} ran past serving counter {serving}"
    );

    *last_serving = serving;
    *last_frontier = frontier;
}
