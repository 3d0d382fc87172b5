use std::sync::Arc;

use chrono::Duration;

use crate::{CounterKey, EventId, FrontierCache, Frontiers, PositionLedger, ReconcileError, StoreError};

/// Everything a reconciliation pass needs for one event.
///
/// Cheap to clone; the stores are shared handles.
#[derive(Clone)]
pub struct EventContext {
    pub event_id: EventId,
    /// How long a position (or checkpoint) may sit before it counts as a no-show.
    pub expiry_period: Duration,
    pub cache: Arc<dyn FrontierCache>,
    pub ledger: Arc<dyn PositionLedger>,
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event_id", &self.event_id)
            .field("expiry_period_secs", &self.expiry_period.num_seconds())
            .finish_non_exhaustive()
    }
}

impl EventContext {
    pub fn new(
        event_id: EventId,
        expiry_period: Duration,
        cache: Arc<dyn FrontierCache>,
        ledger: Arc<dyn PositionLedger>,
    ) -> Self {
        Self {
            event_id,
            expiry_period,
            cache,
            ledger,
        }
    }

    /// Reads all three counters. Not atomic across keys.
    pub async fn read_frontiers(&self) -> Result<Frontiers, ReconcileError> {
        Ok(Frontiers {
            queue_counter: self.counter(CounterKey::QueueCounter).await?,
            serving_counter: self.counter(CounterKey::ServingCounter).await?,
            max_expired: self.counter(CounterKey::MaxExpiredFrontier).await?,
        })
    }

    pub(crate) async fn counter(&self, key: CounterKey) -> Result<i64, ReconcileError> {
        self.cache.get(key).await.map_err(|e| self.fault(e))
    }

    pub(crate) fn fault(&self, err: StoreError) -> ReconcileError {
        ReconcileError::from_store(&self.event_id, err)
    }
}
