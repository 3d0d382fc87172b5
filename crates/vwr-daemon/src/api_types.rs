//! Request and response types for all vwr-daemon HTTP endpoints.
//!
//! No business logic lives here. Types that embed a pass summary are
//! `Serialize` only; tests decode them as `serde_json::Value`.

use serde::{Deserialize, Serialize};
use vwr_reconcile::Frontiers;

use crate::state::PassSummary;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub event_id: String,
    pub expiry_period_secs: i64,
    pub daemon_uptime_secs: u64,
    /// `None` when the cache could not be read; see `frontiers_error`.
    pub frontiers: Option<Frontiers>,
    pub frontiers_error: Option<String>,
    pub last_expiry: Option<PassSummary>,
    pub last_advance: Option<PassSummary>,
}

// ---------------------------------------------------------------------------
// Refusals and faults
// ---------------------------------------------------------------------------

/// 409: a pass of this component is already running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyResponse {
    pub error: String,
    /// "expiry_marker" | "serving_advancer"
    pub component: String,
}

/// 503 / 500: the pass failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultResponse {
    pub error: String,
    /// "UPSTREAM_UNAVAILABLE" | "INCONSISTENT_STATE"
    pub kind: String,
    pub event_id: String,
}
