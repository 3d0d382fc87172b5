//! Axum router and all HTTP handlers for vwr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use vwr_reconcile::FaultKind;

use crate::{
    api_types::{BusyResponse, FaultResponse, HealthResponse, StatusResponse},
    state::{uptime_secs, AppState, BusMsg, RunError, Trigger},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/reconcile/expire", post(reconcile_expire))
        .route("/v1/reconcile/advance", post(reconcile_advance))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let (frontiers, frontiers_error) = match st.ctx.read_frontiers().await {
        Ok(f) => (Some(f), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let snap = StatusResponse {
        event_id: st.ctx.event_id.to_string(),
        expiry_period_secs: st.ctx.expiry_period.num_seconds(),
        daemon_uptime_secs: uptime_secs(),
        frontiers,
        frontiers_error,
        last_expiry: st.last_expiry.read().await.clone(),
        last_advance: st.last_advance.read().await.clone(),
    };
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile/expire  /v1/reconcile/advance
// ---------------------------------------------------------------------------

/// Trigger one Expiry Marker pass. The body, if any, is an opaque JSON
/// payload that is logged and otherwise ignored.
pub(crate) async fn reconcile_expire(
    State(st): State<Arc<AppState>>,
    payload: Option<Json<Value>>,
) -> Response {
    let payload = payload.map(|Json(v)| v);
    match st.run_expiry(Trigger::Http, payload.as_ref()).await {
        Ok(pass) => (StatusCode::OK, Json(pass)).into_response(),
        Err(e) => run_error_response(&st, e),
    }
}

/// Trigger one Serving Advancer pass. Same payload handling as expire.
pub(crate) async fn reconcile_advance(
    State(st): State<Arc<AppState>>,
    payload: Option<Json<Value>>,
) -> Response {
    let payload = payload.map(|Json(v)| v);
    match st.run_advance(Trigger::Http, payload.as_ref()).await {
        Ok(pass) => (StatusCode::OK, Json(pass)).into_response(),
        Err(e) => run_error_response(&st, e),
    }
}

fn run_error_response(st: &AppState, err: RunError) -> Response {
    match err {
        RunError::Busy(component) => (
            StatusCode::CONFLICT,
            Json(BusyResponse {
                error: format!("PASS_IN_PROGRESS: {} is already running", component.as_str()),
                component: component.as_str().to_string(),
            }),
        )
            .into_response(),
        RunError::Failed(e) => {
            let code = match e.kind() {
                FaultKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                FaultKind::InconsistentState => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(FaultResponse {
                    error: e.to_string(),
                    kind: e.kind().as_str().to_string(),
                    event_id: st.ctx.event_id.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Pass(_) => "pass",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
