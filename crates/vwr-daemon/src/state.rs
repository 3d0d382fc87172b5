//! Shared runtime state for vwr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The background tick
//! tasks and the HTTP triggers run passes through the same methods, so the
//! per-component guard covers both.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};
use vwr_reconcile::{
    advance_serving_counter, mark_expired_positions, AdvancePass, EventContext, ExpiryPass,
    ReconcileError,
};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Pass(PassSummary),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Components and pass records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    ExpiryMarker,
    ServingAdvancer,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::ExpiryMarker => "expiry_marker",
            Component::ServingAdvancer => "serving_advancer",
        }
    }
}

/// What started a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Tick,
    Http,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PassResult {
    Expiry(ExpiryPass),
    Advance(AdvancePass),
    Failed { kind: String, error: String },
}

/// Last-known outcome of one component, surfaced by GET /v1/status.
#[derive(Clone, Debug, Serialize)]
pub struct PassSummary {
    pub component: Component,
    pub trigger: Trigger,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: PassResult,
}

/// Why a triggered pass did not produce a summary.
#[derive(Debug)]
pub enum RunError {
    /// Another pass of the component holds the guard.
    Busy(Component),
    Failed(ReconcileError),
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub ctx: EventContext,
    /// Single-writer guards. Held for the whole pass; contenders skip.
    expiry_guard: Mutex<()>,
    advance_guard: Mutex<()>,
    pub last_expiry: RwLock<Option<PassSummary>>,
    pub last_advance: RwLock<Option<PassSummary>>,
}

impl AppState {
    pub fn new(ctx: EventContext) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "vwr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            ctx,
            expiry_guard: Mutex::new(()),
            advance_guard: Mutex::new(()),
            last_expiry: RwLock::new(None),
            last_advance: RwLock::new(None),
        }
    }

    /// Run one Expiry Marker pass unless one is already in flight.
    pub async fn run_expiry(
        &self,
        trigger: Trigger,
        payload: Option<&Value>,
    ) -> Result<ExpiryPass, RunError> {
        let component = Component::ExpiryMarker;
        let Ok(_guard) = self.expiry_guard.try_lock() else {
            return Err(self.busy(component, trigger));
        };
        log_trigger(component, trigger, payload);

        match mark_expired_positions(&self.ctx, Utc::now()).await {
            Ok(pass) => {
                self.record(component, trigger, PassResult::Expiry(pass.clone()))
                    .await;
                Ok(pass)
            }
            Err(e) => Err(self.fail(component, trigger, e).await),
        }
    }

    /// Run one Serving Advancer pass unless one is already in flight.
    pub async fn run_advance(
        &self,
        trigger: Trigger,
        payload: Option<&Value>,
    ) -> Result<AdvancePass, RunError> {
        let component = Component::ServingAdvancer;
        let Ok(_guard) = self.advance_guard.try_lock() else {
            return Err(self.busy(component, trigger));
        };
        log_trigger(component, trigger, payload);

        match advance_serving_counter(&self.ctx, Utc::now()).await {
            Ok(pass) => {
                self.record(component, trigger, PassResult::Advance(pass.clone()))
                    .await;
                Ok(pass)
            }
            Err(e) => Err(self.fail(component, trigger, e).await),
        }
    }

    fn busy(&self, component: Component, trigger: Trigger) -> RunError {
        info!(
            component = component.as_str(),
            ?trigger,
            "pass already running; skipped"
        );
        let _ = self.bus.send(BusMsg::LogLine {
            level: "INFO".to_string(),
            msg: format!("{} busy; {:?} trigger skipped", component.as_str(), trigger),
        });
        RunError::Busy(component)
    }

    async fn fail(&self, component: Component, trigger: Trigger, err: ReconcileError) -> RunError {
        let kind = err.kind().as_str();
        error!(component = component.as_str(), kind, error = %err, "pass failed");
        let _ = self.bus.send(BusMsg::LogLine {
            level: "ERROR".to_string(),
            msg: format!("{} {kind}: {err}", component.as_str()),
        });
        self.record(
            component,
            trigger,
            PassResult::Failed {
                kind: kind.to_string(),
                error: err.to_string(),
            },
        )
        .await;
        RunError::Failed(err)
    }

    async fn record(&self, component: Component, trigger: Trigger, result: PassResult) {
        let summary = PassSummary {
            component,
            trigger,
            finished_at: Utc::now(),
            result,
        };
        let slot = match component {
            Component::ExpiryMarker => &self.last_expiry,
            Component::ServingAdvancer => &self.last_advance,
        };
        *slot.write().await = Some(summary.clone());
        let _ = self.bus.send(BusMsg::Pass(summary));
    }
}

fn log_trigger(component: Component, trigger: Trigger, payload: Option<&Value>) {
    match payload {
        Some(p) => info!(component = component.as_str(), ?trigger, payload = %p, "pass triggered"),
        None => info!(component = component.as_str(), ?trigger, "pass triggered"),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn one periodic task per component.
///
/// Each task runs its pass every `interval`. A tick that finds the previous
/// pass still running is skipped; a failed pass is logged and the next tick
/// retries from scratch.
pub fn spawn_reconcile_ticks(state: Arc<AppState>, interval: Duration) {
    let expiry_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(RunError::Failed(e)) = expiry_state.run_expiry(Trigger::Tick, None).await {
                warn!(kind = e.kind().as_str(), "expiry tick failed; retrying next interval");
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(RunError::Failed(e)) = state.run_advance(Trigger::Tick, None).await {
                warn!(kind = e.kind().as_str(), "advance tick failed; retrying next interval");
            }
        }
    });
}
