use crate::{CounterKey, EventId, StoreError};

/// Coarse classification used by the trigger surfaces to decide between
/// "retry later" and "page someone".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Cache or ledger failure. The whole pass may be retried.
    UpstreamUnavailable,
    /// Bookkeeping no longer adds up. Needs an operator.
    InconsistentState,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            FaultKind::InconsistentState => "INCONSISTENT_STATE",
        }
    }
}

/// Evidence for an [`FaultKind::InconsistentState`] fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// `positions_served` exceeds the span width it is credited against.
    NegativeCredit {
        previous_position: i64,
        checkpoint: i64,
        positions_served: i64,
    },
    /// A checkpoint at or below `queue_counter` has no position record.
    MissingPosition { checkpoint: i64, queue_counter: i64 },
    /// A counter the pass depends on was never initialised.
    UninitialisedCounter { key: CounterKey },
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inconsistency::NegativeCredit {
                previous_position,
                checkpoint,
                positions_served,
            } => write!(
                f,
                "negative credit: checkpoint={checkpoint} previous={previous_position} \
                 positions_served={positions_served}"
            ),
            Inconsistency::MissingPosition {
                checkpoint,
                queue_counter,
            } => write!(
                f,
                "checkpoint {checkpoint} references a position absent from the ledger \
                 (queue_counter={queue_counter})"
            ),
            Inconsistency::UninitialisedCounter { key } => {
                write!(f, "counter '{key}' is not initialised")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("upstream unavailable for event {event_id}: {source}")]
    Upstream {
        event_id: EventId,
        #[source]
        source: StoreError,
    },

    #[error("inconsistent state for event {event_id}: {detail}")]
    Inconsistent {
        event_id: EventId,
        detail: Inconsistency,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> FaultKind {
        match self {
            ReconcileError::Upstream { .. } => FaultKind::UpstreamUnavailable,
            ReconcileError::Inconsistent { .. } => FaultKind::InconsistentState,
        }
    }

    pub(crate) fn inconsistent(event_id: &EventId, detail: Inconsistency) -> Self {
        ReconcileError::Inconsistent {
            event_id: event_id.clone(),
            detail,
        }
    }

    /// Maps a store failure; an uninitialised counter is a bookkeeping fault,
    /// not an outage.
    pub(crate) fn from_store(event_id: &EventId, err: StoreError) -> Self {
        match err {
            StoreError::MissingCounter { key } => {
                Self::inconsistent(event_id, Inconsistency::UninitialisedCounter { key })
            }
            other => ReconcileError::Upstream {
                event_id: event_id.clone(),
                source: other,
            },
        }
    }
}
