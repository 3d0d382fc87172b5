//! vwr-reconcile
//!
//! Admission-flow reconciliation for a virtual waiting room.
//!
//! Two frontiers are reconciled against a durable position ledger:
//! - Expiry Marker: flags positions held past the expiry window and moves the
//!   `max_queue_position_expired` frontier forward.
//! - Serving Advancer: walks serving checkpoints beyond that frontier and
//!   moves `serving_counter` past spans of expired (no-show) positions.
//!
//! Both passes are strictly sequential read-decide-write runs. The only
//! synchronisation is the cache's atomic increment and compare-and-set.
//! Callers must not overlap two passes of the same component for the same
//! event; frontier moves use compare-and-set so an overlap that slips through
//! is detected and reported as contention instead of double-advancing.

mod advancer;
mod context;
mod error;
mod expiry;
pub mod memory;
mod store;
mod types;

pub use advancer::{advance_serving_counter, credit_for, AdvancePass, AppliedAdvance, StopReason};
pub use context::EventContext;
pub use error::{FaultKind, Inconsistency, ReconcileError};
pub use expiry::{mark_expired_positions, ExpiryOutcome, ExpiryPass};
pub use store::{CasOutcome, FrontierCache, PositionLedger, StoreError};
pub use types::*;
