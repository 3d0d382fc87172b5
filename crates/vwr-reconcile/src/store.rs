//! Store boundaries consumed by the reconciliation passes.
//!
//! Neither trait knows about the other. The frontier cache is event-scoped by
//! whoever constructs it; the ledger takes the event id on every call.

use std::ops::Range;

use async_trait::async_trait;

use crate::{CounterKey, EventId, PositionRecord, ServingCheckpoint};

/// Errors a store implementation may return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Network, auth, throttling or any other backend failure.
    #[error("{backend} unavailable: {source}")]
    Unavailable {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The counter has never been written for this event.
    #[error("counter '{key}' is not initialised")]
    MissingCounter { key: CounterKey },
}

impl StoreError {
    pub fn unavailable(
        backend: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Unavailable {
            backend,
            source: source.into(),
        }
    }
}

/// Result of [`FrontierCache::compare_and_set`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The stored value was not the expected one; nothing was written.
    Mismatch { actual: i64 },
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}

/// Fast counter store holding the three frontiers of one event.
#[async_trait]
pub trait FrontierCache: Send + Sync {
    async fn get(&self, key: CounterKey) -> Result<i64, StoreError>;

    async fn set(&self, key: CounterKey, value: i64) -> Result<(), StoreError>;

    /// Atomic add. Returns the post-increment value.
    async fn incr_by(&self, key: CounterKey, delta: i64) -> Result<i64, StoreError>;

    /// Atomically replace `expected` with `new`.
    async fn compare_and_set(
        &self,
        key: CounterKey,
        expected: i64,
        new: i64,
    ) -> Result<CasOutcome, StoreError>;
}

/// Durable, ordered store of position records and serving checkpoints.
#[async_trait]
pub trait PositionLedger: Send + Sync {
    /// Not-yet-expired positions with `range.start <= position < range.end`,
    /// ordered by position descending.
    async fn unexpired_positions(
        &self,
        event_id: &EventId,
        range: Range<i64>,
    ) -> Result<Vec<PositionRecord>, StoreError>;

    async fn position(
        &self,
        event_id: &EventId,
        position: i64,
    ) -> Result<Option<PositionRecord>, StoreError>;

    /// Flags a position expired. Returns `true` only when this call performed
    /// the false -> true transition.
    async fn mark_expired(&self, event_id: &EventId, position: i64) -> Result<bool, StoreError>;

    /// Checkpoints with `serving_counter > after`, ascending.
    async fn checkpoints_after(
        &self,
        event_id: &EventId,
        after: i64,
    ) -> Result<Vec<ServingCheckpoint>, StoreError>;

    /// Lowest checkpoint with `serving_counter >= value`.
    async fn first_checkpoint_at_or_after(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError>;

    /// Highest checkpoint with `serving_counter <= value`.
    async fn last_checkpoint_at_or_before(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError>;

    async fn put_checkpoint(&self, checkpoint: &ServingCheckpoint) -> Result<(), StoreError>;
}
