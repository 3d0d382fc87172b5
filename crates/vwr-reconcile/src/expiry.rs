//! Expiry Marker.
//!
//! Scans the not-yet-expired positions between `max_queue_position_expired`
//! and `serving_counter`, flags those held past the expiry window and moves
//! the frontier forward by the number actually flagged.
//!
//! The frontier stops short of the next checkpoint above it. That checkpoint
//! has not been absorbed by the Serving Advancer yet, and only the Advancer
//! moves the frontier onto a checkpoint.
//!
//! The reference time is per range: the issue time of the earliest serving
//! checkpoint at or after the furthest scanned position. Every position in a
//! pass is therefore judged against the same instant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::{CasOutcome, CounterKey, EventContext, ReconcileError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpiryOutcome {
    /// Nothing unexpired in range, or nothing left to flag.
    NoWork,
    /// No checkpoint has been written at or after the scanned range yet.
    NoReferenceCheckpoint { last_queue_position: i64 },
    /// The reference checkpoint is still inside the expiry window.
    WithinWindow { reference_time: DateTime<Utc> },
    /// Positions were flagged and the frontier moved.
    Advanced,
    /// Positions were flagged but the frontier already sits just below the
    /// next unabsorbed checkpoint.
    HeldBelowCheckpoint { checkpoint: i64 },
    /// Positions were flagged but another writer moved the frontier first.
    Contended { actual: i64 },
}

/// Summary of one Expiry Marker pass.
#[derive(Clone, Debug, Serialize)]
pub struct ExpiryPass {
    pub pass_id: Uuid,
    pub scanned: usize,
    pub flagged: usize,
    pub frontier_before: i64,
    pub frontier_after: i64,
    pub outcome: ExpiryOutcome,
}

impl ExpiryPass {
    fn start(pass_id: Uuid, frontier: i64) -> Self {
        Self {
            pass_id,
            scanned: 0,
            flagged: 0,
            frontier_before: frontier,
            frontier_after: frontier,
            outcome: ExpiryOutcome::NoWork,
        }
    }

    pub fn is_no_work(&self) -> bool {
        self.outcome == ExpiryOutcome::NoWork
    }
}

/// Run one Expiry Marker pass evaluated at `now`.
///
/// Safe to re-run at any point: the `expired == false` filter keeps flagging
/// idempotent and the frontier only moves through compare-and-set against the
/// value read at the start of the pass.
pub async fn mark_expired_positions(
    ctx: &EventContext,
    now: DateTime<Utc>,
) -> Result<ExpiryPass, ReconcileError> {
    let pass_id = Uuid::new_v4();
    let span = tracing::info_span!("expiry_marker", event_id = %ctx.event_id, %pass_id);
    run_pass(ctx, now, pass_id).instrument(span).await
}

async fn run_pass(
    ctx: &EventContext,
    now: DateTime<Utc>,
    pass_id: Uuid,
) -> Result<ExpiryPass, ReconcileError> {
    let frontier = ctx.counter(CounterKey::MaxExpiredFrontier).await?;
    let serving = ctx.counter(CounterKey::ServingCounter).await?;
    let mut pass = ExpiryPass::start(pass_id, frontier);

    if frontier >= serving {
        info!(frontier, serving, "no positions between frontier and serving counter");
        return Ok(pass);
    }

    let scanned = ctx
        .ledger
        .unexpired_positions(&ctx.event_id, frontier..serving)
        .await
        .map_err(|e| ctx.fault(e))?;
    if scanned.is_empty() {
        info!(frontier, serving, "no unexpired positions in range");
        return Ok(pass);
    }
    pass.scanned = scanned.len();

    let last_queue_position = scanned
        .iter()
        .map(|p| p.position)
        .max()
        .unwrap_or(frontier);

    let reference = ctx
        .ledger
        .first_checkpoint_at_or_after(&ctx.event_id, last_queue_position)
        .await
        .map_err(|e| ctx.fault(e))?;
    let Some(reference) = reference else {
        info!(last_queue_position, "no serving checkpoint at or after scanned range");
        pass.outcome = ExpiryOutcome::NoReferenceCheckpoint {
            last_queue_position,
        };
        return Ok(pass);
    };

    let held_for = now.signed_duration_since(reference.issue_time);
    if held_for <= ctx.expiry_period {
        debug!(
            reference_checkpoint = reference.serving_counter,
            held_secs = held_for.num_seconds(),
            "scanned range still inside expiry window"
        );
        pass.outcome = ExpiryOutcome::WithinWindow {
            reference_time: reference.issue_time,
        };
        return Ok(pass);
    }

    for record in &scanned {
        let transitioned = ctx
            .ledger
            .mark_expired(&ctx.event_id, record.position)
            .await
            .map_err(|e| ctx.fault(e))?;
        if transitioned {
            pass.flagged += 1;
        }
    }

    if pass.flagged < pass.scanned {
        warn!(
            scanned = pass.scanned,
            flagged = pass.flagged,
            "scanned positions already flagged by another run; frontier credits flagged only"
        );
    }
    if pass.flagged == 0 {
        return Ok(pass);
    }

    let uncapped = frontier + pass.flagged as i64;
    debug_assert!(
        uncapped <= serving,
        "flagged {} distinct positions in [{frontier}, {serving})",
        pass.flagged
    );

    let next_checkpoint = ctx
        .ledger
        .first_checkpoint_at_or_after(&ctx.event_id, frontier + 1)
        .await
        .map_err(|e| ctx.fault(e))?
        .map(|c| c.serving_counter);
    let target = match next_checkpoint {
        Some(checkpoint) if uncapped >= checkpoint => {
            if checkpoint - 1 == frontier {
                info!(
                    flagged = pass.flagged,
                    frontier, checkpoint, "frontier held below unabsorbed checkpoint"
                );
                pass.outcome = ExpiryOutcome::HeldBelowCheckpoint { checkpoint };
                return Ok(pass);
            }
            checkpoint - 1
        }
        _ => uncapped,
    };

    match ctx
        .cache
        .compare_and_set(CounterKey::MaxExpiredFrontier, frontier, target)
        .await
        .map_err(|e| ctx.fault(e))?
    {
        CasOutcome::Applied => {
            pass.frontier_after = target;
            pass.outcome = ExpiryOutcome::Advanced;
            info!(
                flagged = pass.flagged,
                frontier_before = frontier,
                frontier_after = target,
                "expired positions flagged"
            );
        }
        CasOutcome::Mismatch { actual } => {
            pass.frontier_after = actual;
            pass.outcome = ExpiryOutcome::Contended { actual };
            warn!(
                expected = frontier,
                actual, "frontier moved by a concurrent run; leaving it in place"
            );
        }
    }

    Ok(pass)
}
