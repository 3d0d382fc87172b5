//! Serving Advancer.
//!
//! Walks serving checkpoints beyond `max_queue_position_expired` in ascending
//! order. A checkpoint whose referenced position and own issue time are both
//! past the expiry window is absorbed: the frontier moves to it, the serving
//! counter is credited with the un-served width of the span it closes, and a
//! fresh checkpoint opens the next span.
//!
//! The first checkpoint still inside the window ends the pass. Later
//! checkpoints are never evaluated ahead of an earlier ineligible one.
//!
//! A span opens at the highest checkpoint at or below the frontier. The
//! frontier itself may sit inside the open span, where the Expiry Marker
//! left it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::{
    CasOutcome, CounterKey, EventContext, Inconsistency, ReconcileError, ServingCheckpoint,
};

/// Why an Advancer pass stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// No checkpoints beyond the frontier.
    NoWork,
    /// Every queried checkpoint was absorbed.
    Exhausted,
    /// This checkpoint is still inside the expiry window.
    WithinWindow {
        checkpoint: i64,
        time_in_queue: DateTime<Utc>,
    },
    /// The checkpoint points past `queue_counter`; its position does not exist yet.
    NotYetIssued { checkpoint: i64, queue_counter: i64 },
    /// Another writer moved the frontier during the pass.
    Contended { expected: i64, actual: i64 },
}

/// One absorbed checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedAdvance {
    pub checkpoint: i64,
    pub increment_by: i64,
    /// Value of the checkpoint appended for the new span, if any.
    pub new_checkpoint: Option<i64>,
}

/// Summary of one Serving Advancer pass.
#[derive(Clone, Debug, Serialize)]
pub struct AdvancePass {
    pub pass_id: Uuid,
    pub applied: Vec<AppliedAdvance>,
    pub stop: StopReason,
    pub frontier_before: i64,
    pub frontier_after: i64,
    pub serving_before: i64,
    pub serving_after: i64,
}

impl AdvancePass {
    pub fn is_no_work(&self) -> bool {
        self.stop == StopReason::NoWork
    }
}

/// Credit for absorbing `checkpoint` when the previous absorbed position was
/// `previous_position`: the span width minus positions genuinely served in it.
pub fn credit_for(
    previous_position: i64,
    checkpoint: &ServingCheckpoint,
) -> Result<i64, Inconsistency> {
    let increment_by =
        (checkpoint.serving_counter - previous_position) - checkpoint.positions_served;
    if increment_by < 0 {
        return Err(Inconsistency::NegativeCredit {
            previous_position,
            checkpoint: checkpoint.serving_counter,
            positions_served: checkpoint.positions_served,
        });
    }
    Ok(increment_by)
}

/// Run one Serving Advancer pass evaluated at `now`.
///
/// An [`ReconcileError::Inconsistent`] aborts the pass at the faulty
/// checkpoint; checkpoints absorbed before it stay absorbed.
pub async fn advance_serving_counter(
    ctx: &EventContext,
    now: DateTime<Utc>,
) -> Result<AdvancePass, ReconcileError> {
    let pass_id = Uuid::new_v4();
    let span = tracing::info_span!("serving_advancer", event_id = %ctx.event_id, %pass_id);
    run_pass(ctx, now, pass_id).instrument(span).await
}

async fn run_pass(
    ctx: &EventContext,
    now: DateTime<Utc>,
    pass_id: Uuid,
) -> Result<AdvancePass, ReconcileError> {
    let frontiers = ctx.read_frontiers().await?;
    debug!(%frontiers, "frontiers read");

    let mut pass = AdvancePass {
        pass_id,
        applied: Vec::new(),
        stop: StopReason::NoWork,
        frontier_before: frontiers.max_expired,
        frontier_after: frontiers.max_expired,
        serving_before: frontiers.serving_counter,
        serving_after: frontiers.serving_counter,
    };

    let checkpoints = ctx
        .ledger
        .checkpoints_after(&ctx.event_id, frontiers.max_expired)
        .await
        .map_err(|e| ctx.fault(e))?;
    if checkpoints.is_empty() {
        info!(frontier = frontiers.max_expired, "no serving checkpoints beyond frontier");
        return Ok(pass);
    }
    pass.stop = StopReason::Exhausted;

    // Positions are numbered from 1; with no checkpoint at or below the
    // frontier the first span opens at 0.
    let mut previous_position = ctx
        .ledger
        .last_checkpoint_at_or_before(&ctx.event_id, frontiers.max_expired)
        .await
        .map_err(|e| ctx.fault(e))?
        .map_or(0, |c| c.serving_counter);
    debug!(span_start = previous_position, "credit span opens");

    for checkpoint in checkpoints {
        let value = checkpoint.serving_counter;

        let position = ctx
            .ledger
            .position(&ctx.event_id, value)
            .await
            .map_err(|e| ctx.fault(e))?;
        let Some(position) = position else {
            if value > frontiers.queue_counter {
                info!(
                    checkpoint = value,
                    queue_counter = frontiers.queue_counter,
                    "checkpoint ahead of issued positions"
                );
                pass.stop = StopReason::NotYetIssued {
                    checkpoint: value,
                    queue_counter: frontiers.queue_counter,
                };
                break;
            }
            error!(
                checkpoint = value,
                absorbed = pass.applied.len(),
                "checkpoint references a position missing from the ledger"
            );
            return Err(ReconcileError::inconsistent(
                &ctx.event_id,
                Inconsistency::MissingPosition {
                    checkpoint: value,
                    queue_counter: frontiers.queue_counter,
                },
            ));
        };

        let time_in_queue = position.issue_time.max(checkpoint.issue_time);
        if now.signed_duration_since(time_in_queue) < ctx.expiry_period {
            debug!(checkpoint = value, %time_in_queue, "checkpoint still inside expiry window");
            pass.stop = StopReason::WithinWindow {
                checkpoint: value,
                time_in_queue,
            };
            break;
        }

        let increment_by = credit_for(previous_position, &checkpoint).map_err(|detail| {
            error!(checkpoint = value, %detail, "refusing to apply credit");
            ReconcileError::inconsistent(&ctx.event_id, detail)
        })?;

        match ctx
            .cache
            .compare_and_set(CounterKey::MaxExpiredFrontier, pass.frontier_after, value)
            .await
            .map_err(|e| ctx.fault(e))?
        {
            CasOutcome::Applied => pass.frontier_after = value,
            CasOutcome::Mismatch { actual } => {
                warn!(
                    expected = pass.frontier_after,
                    actual, "frontier moved by a concurrent run; ending pass"
                );
                pass.stop = StopReason::Contended {
                    expected: pass.frontier_after,
                    actual,
                };
                break;
            }
        }

        // A fully served span leaves the counter where it is; appending would
        // overwrite the checkpoint already stored at that value.
        let mut new_checkpoint = None;
        if increment_by > 0 {
            let serving = ctx
                .cache
                .incr_by(CounterKey::ServingCounter, increment_by)
                .await
                .map_err(|e| ctx.fault(e))?;
            ctx.ledger
                .put_checkpoint(&ServingCheckpoint::fresh(ctx.event_id.clone(), serving, now))
                .await
                .map_err(|e| ctx.fault(e))?;
            pass.serving_after = serving;
            new_checkpoint = Some(serving);
        }

        info!(
            checkpoint = value,
            increment_by,
            serving_counter = pass.serving_after,
            "checkpoint absorbed"
        );
        pass.applied.push(AppliedAdvance {
            checkpoint: value,
            increment_by,
            new_checkpoint,
        });
        previous_position = value;
    }

    Ok(pass)
}
