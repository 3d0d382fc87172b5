//! vwr-daemon entry point.
//!
//! Sets up tracing, resolves settings (fail closed), connects the ledger and
//! the frontier counters, starts the per-component reconcile ticks and serves
//! the HTTP trigger surface. Handlers live in `routes.rs`; shared state in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use vwr_config::{secrets, LoadedConfig, Settings, UnusedKeyPolicy};
use vwr_daemon::{routes, state};
use vwr_db::{PgFrontierCache, PgLedger};
use vwr_reconcile::{EventContext, EventId};

/// Comma-separated YAML layer paths, base first.
const ENV_CONFIG_PATHS: &str = "VWR_CONFIG_PATHS";

/// Connections for the counter pool; passes issue one statement at a time.
const CACHE_MAX_CONNECTIONS: u32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let report = vwr_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        warn!(pointer = %ptr, "config key is not used");
    }

    let settings = Settings::from_env(&loaded.config_json)?;
    let credential =
        secrets::resolve_cache_credential(&loaded.config_json, |name| std::env::var(name).ok())?;
    let event_id = EventId::new(settings.event_id.clone()).context("event id is blank")?;
    let expiry_period = chrono::Duration::from_std(settings.expiry_period)
        .context("expiry period out of range")?;

    info!(
        event_id = %event_id,
        config_hash = %loaded.config_hash,
        expiry_period_secs = expiry_period.num_seconds(),
        interval_secs = settings.interval.as_secs(),
        "vwr-daemon starting"
    );

    let ledger_pool = vwr_db::connect(&settings.ledger_url, None, settings.ledger_max_connections)
        .await
        .context("ledger connect failed")?;
    let cache_pool = vwr_db::connect(
        &settings.cache_url,
        Some(credential.expose()),
        CACHE_MAX_CONNECTIONS,
    )
    .await
    .context("cache connect failed")?;

    let ctx = EventContext::new(
        event_id.clone(),
        expiry_period,
        Arc::new(PgFrontierCache::new(cache_pool, event_id)),
        Arc::new(PgLedger::new(ledger_pool)),
    );
    let shared = Arc::new(state::AppState::new(ctx));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_reconcile_ticks(Arc::clone(&shared), settings.interval);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = settings
        .daemon_addr
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8980)));
    info!("vwr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config() -> anyhow::Result<LoadedConfig> {
    let Ok(raw) = std::env::var(ENV_CONFIG_PATHS) else {
        return Ok(LoadedConfig::empty());
    };
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    vwr_config::load_layered_yaml(&paths)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
