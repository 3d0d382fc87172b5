use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one waiting-room event. Every counter and ledger row is
/// scoped to exactly one event.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Returns `None` for a blank id.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three frontier counters held in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CounterKey {
    /// Highest position issued so far. Written by the issuer only.
    QueueCounter,
    /// Highest position currently being served.
    ServingCounter,
    /// Highest position up to which expiry has been evaluated.
    MaxExpiredFrontier,
}

impl CounterKey {
    pub const ALL: [CounterKey; 3] = [
        CounterKey::QueueCounter,
        CounterKey::ServingCounter,
        CounterKey::MaxExpiredFrontier,
    ];

    /// Key name shared with the issuer and the client poll API.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKey::QueueCounter => "queue_counter",
            CounterKey::ServingCounter => "serving_counter",
            CounterKey::MaxExpiredFrontier => "max_queue_position_expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queue_counter" => Some(CounterKey::QueueCounter),
            "serving_counter" => Some(CounterKey::ServingCounter),
            "max_queue_position_expired" => Some(CounterKey::MaxExpiredFrontier),
            _ => None,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One issued queue position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub event_id: EventId,
    pub position: i64,
    pub issue_time: DateTime<Utc>,
    /// Only ever moves false -> true.
    pub expired: bool,
}

impl PositionRecord {
    pub fn issued(event_id: EventId, position: i64, issue_time: DateTime<Utc>) -> Self {
        Self {
            event_id,
            position,
            issue_time,
            expired: false,
        }
    }
}

/// One serving-counter advance. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingCheckpoint {
    pub event_id: EventId,
    /// Value `serving_counter` held when this checkpoint was written.
    pub serving_counter: i64,
    pub issue_time: DateTime<Utc>,
    /// Positions genuinely consumed in the span ending at this checkpoint.
    pub positions_served: i64,
}

impl ServingCheckpoint {
    /// A checkpoint opening a new span with nothing credited as served yet.
    pub fn fresh(event_id: EventId, serving_counter: i64, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            serving_counter,
            issue_time: now,
            positions_served: 0,
        }
    }
}

/// Snapshot of the three counters for one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontiers {
    pub queue_counter: i64,
    pub serving_counter: i64,
    pub max_expired: i64,
}

impl Frontiers {
    /// `max_expired <= serving_counter <= queue_counter`.
    pub fn is_bounded(&self) -> bool {
        self.max_expired <= self.serving_counter && self.serving_counter <= self.queue_counter
    }

    pub fn get(&self, key: CounterKey) -> i64 {
        match key {
            CounterKey::QueueCounter => self.queue_counter,
            CounterKey::ServingCounter => self.serving_counter,
            CounterKey::MaxExpiredFrontier => self.max_expired,
        }
    }
}

impl fmt::Display for Frontiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queue_counter={} serving_counter={} max_queue_position_expired={}",
            self.queue_counter, self.serving_counter, self.max_expired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_rejects_blank() {
        assert!(EventId::new("   ").is_none());
        assert_eq!(EventId::new(" evt-1 ").unwrap().as_str(), "evt-1");
    }

    #[test]
    fn counter_key_names_round_trip() {
        for key in CounterKey::ALL {
            assert_eq!(CounterKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(CounterKey::parse("max_expired_frontier"), None);
    }

    #[test]
    fn frontiers_bounding() {
        let ok = Frontiers {
            queue_counter: 10,
            serving_counter: 5,
            max_expired: 5,
        };
        assert!(ok.is_bounded());

        let behind = Frontiers {
            queue_counter: 4,
            serving_counter: 5,
            max_expired: 0,
        };
        assert!(!behind.is_bounded());
    }
}
