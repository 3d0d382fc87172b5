//! In-memory stores for tests and local development.
//!
//! Thread-safe through `RwLock`; nothing is durable and nothing is shared
//! across processes.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    CasOutcome, CounterKey, EventId, FrontierCache, Frontiers, PositionLedger, PositionRecord,
    ServingCheckpoint, StoreError,
};

fn poison_err<T>(backend: &'static str) -> impl FnOnce(PoisonError<T>) -> StoreError {
    move |_| StoreError::unavailable(backend, "lock poisoned")
}

/// Counter store for a single event.
#[derive(Debug, Default)]
pub struct InMemoryFrontierCache {
    counters: RwLock<HashMap<CounterKey, i64>>,
}

impl InMemoryFrontierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache seeded with all three counters.
    pub fn with_frontiers(frontiers: Frontiers) -> Self {
        let counters = CounterKey::ALL
            .iter()
            .map(|k| (*k, frontiers.get(*k)))
            .collect();
        Self {
            counters: RwLock::new(counters),
        }
    }

    /// Current value, `None` if never written.
    pub fn peek(&self, key: CounterKey) -> Option<i64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }
}

#[async_trait]
impl FrontierCache for InMemoryFrontierCache {
    async fn get(&self, key: CounterKey) -> Result<i64, StoreError> {
        let counters = self.counters.read().map_err(poison_err("cache"))?;
        counters
            .get(&key)
            .copied()
            .ok_or(StoreError::MissingCounter { key })
    }

    async fn set(&self, key: CounterKey, value: i64) -> Result<(), StoreError> {
        let mut counters = self.counters.write().map_err(poison_err("cache"))?;
        counters.insert(key, value);
        Ok(())
    }

    async fn incr_by(&self, key: CounterKey, delta: i64) -> Result<i64, StoreError> {
        let mut counters = self.counters.write().map_err(poison_err("cache"))?;
        let value = counters
            .get_mut(&key)
            .ok_or(StoreError::MissingCounter { key })?;
        *value += delta;
        Ok(*value)
    }

    async fn compare_and_set(
        &self,
        key: CounterKey,
        expected: i64,
        new: i64,
    ) -> Result<CasOutcome, StoreError> {
        let mut counters = self.counters.write().map_err(poison_err("cache"))?;
        let current = counters
            .get_mut(&key)
            .ok_or(StoreError::MissingCounter { key })?;
        if *current != expected {
            return Ok(CasOutcome::Mismatch { actual: *current });
        }
        *current = new;
        Ok(CasOutcome::Applied)
    }
}

#[derive(Debug, Default)]
struct EventRows {
    positions: BTreeMap<i64, PositionRecord>,
    checkpoints: BTreeMap<i64, ServingCheckpoint>,
}

/// Position ledger keyed by event, ordered by position / counter value.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: RwLock<HashMap<EventId, EventRows>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a position as the issuer would.
    pub fn issue_position(&self, event_id: &EventId, position: i64, issue_time: DateTime<Utc>) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events
            .entry(event_id.clone())
            .or_default()
            .positions
            .insert(
                position,
                PositionRecord::issued(event_id.clone(), position, issue_time),
            );
    }

    /// Appends a checkpoint directly, bypassing the Advancer.
    pub fn append_checkpoint(&self, checkpoint: ServingCheckpoint) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events
            .entry(checkpoint.event_id.clone())
            .or_default()
            .checkpoints
            .insert(checkpoint.serving_counter, checkpoint);
    }

    pub fn positions(&self, event_id: &EventId) -> Vec<PositionRecord> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events
            .get(event_id)
            .map(|rows| rows.positions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn checkpoints(&self, event_id: &EventId) -> Vec<ServingCheckpoint> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events
            .get(event_id)
            .map(|rows| rows.checkpoints.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn expired_count(&self, event_id: &EventId) -> usize {
        self.positions(event_id).iter().filter(|p| p.expired).count()
    }
}

#[async_trait]
impl PositionLedger for InMemoryLedger {
    async fn unexpired_positions(
        &self,
        event_id: &EventId,
        range: Range<i64>,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        let events = self.events.read().map_err(poison_err("ledger"))?;
        let Some(rows) = events.get(event_id) else {
            return Ok(Vec::new());
        };
        if range.is_empty() {
            return Ok(Vec::new());
        }
        Ok(rows
            .positions
            .range(range)
            .rev()
            .filter(|(_, p)| !p.expired)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn position(
        &self,
        event_id: &EventId,
        position: i64,
    ) -> Result<Option<PositionRecord>, StoreError> {
        let events = self.events.read().map_err(poison_err("ledger"))?;
        Ok(events
            .get(event_id)
            .and_then(|rows| rows.positions.get(&position))
            .cloned())
    }

    async fn mark_expired(&self, event_id: &EventId, position: i64) -> Result<bool, StoreError> {
        let mut events = self.events.write().map_err(poison_err("ledger"))?;
        let record = events
            .get_mut(event_id)
            .and_then(|rows| rows.positions.get_mut(&position));
        match record {
            Some(record) if !record.expired => {
                record.expired = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn checkpoints_after(
        &self,
        event_id: &EventId,
        after: i64,
    ) -> Result<Vec<ServingCheckpoint>, StoreError> {
        let events = self.events.read().map_err(poison_err("ledger"))?;
        Ok(events
            .get(event_id)
            .map(|rows| {
                rows.checkpoints
                    .range(after.saturating_add(1)..)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn first_checkpoint_at_or_after(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError> {
        let events = self.events.read().map_err(poison_err("ledger"))?;
        Ok(events
            .get(event_id)
            .and_then(|rows| rows.checkpoints.range(value..).next())
            .map(|(_, c)| c.clone()))
    }

    async fn last_checkpoint_at_or_before(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError> {
        let events = self.events.read().map_err(poison_err("ledger"))?;
        Ok(events
            .get(event_id)
            .and_then(|rows| rows.checkpoints.range(..=value).next_back())
            .map(|(_, c)| c.clone()))
    }

    async fn put_checkpoint(&self, checkpoint: &ServingCheckpoint) -> Result<(), StoreError> {
        let mut events = self.events.write().map_err(poison_err("ledger"))?;
        // Append-only: an existing checkpoint at this value is kept.
        events
            .entry(checkpoint.event_id.clone())
            .or_default()
            .checkpoints
            .entry(checkpoint.serving_counter)
            .or_insert_with(|| checkpoint.clone());
        Ok(())
    }
}
