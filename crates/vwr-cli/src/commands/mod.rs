//! Command handlers. Every handler resolves settings the same way the daemon
//! does: YAML layers from `--config`, then environment overrides.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use vwr_config::{secrets, LoadedConfig, Settings, UnusedKeyPolicy};
use vwr_db::{PgFrontierCache, PgLedger};
use vwr_reconcile::{EventContext, EventId};

use crate::DbTarget;

pub mod frontiers;
pub mod reconcile;

pub(crate) struct Resolved {
    pub loaded: LoadedConfig,
    pub settings: Settings,
    pub event_id: EventId,
}

pub(crate) fn resolve(paths: &[&str]) -> Result<Resolved> {
    let loaded = if paths.is_empty() {
        LoadedConfig::empty()
    } else {
        vwr_config::load_layered_yaml(paths)?
    };
    let report = vwr_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        tracing::warn!(pointer = %ptr, "config key is not used");
    }

    let settings = Settings::from_env(&loaded.config_json)?;
    let event_id = EventId::new(settings.event_id.clone()).context("event id is blank")?;
    Ok(Resolved {
        loaded,
        settings,
        event_id,
    })
}

pub(crate) async fn connect(r: &Resolved, target: DbTarget) -> Result<PgPool> {
    match target {
        DbTarget::Ledger => {
            vwr_db::connect(&r.settings.ledger_url, None, r.settings.ledger_max_connections)
                .await
                .context("ledger connect failed")
        }
        DbTarget::Cache => {
            let credential = secrets::resolve_cache_credential(&r.loaded.config_json, |name| {
                std::env::var(name).ok()
            })?;
            vwr_db::connect(&r.settings.cache_url, Some(credential.expose()), 2)
                .await
                .context("cache connect failed")
        }
    }
}

pub(crate) async fn event_context(r: &Resolved) -> Result<EventContext> {
    let expiry_period = chrono::Duration::from_std(r.settings.expiry_period)
        .context("expiry period out of range")?;
    let cache_pool = connect(r, DbTarget::Cache).await?;
    let ledger_pool = connect(r, DbTarget::Ledger).await?;
    Ok(EventContext::new(
        r.event_id.clone(),
        expiry_period,
        Arc::new(PgFrontierCache::new(cache_pool, r.event_id.clone())),
        Arc::new(PgLedger::new(ledger_pool)),
    ))
}

/// `vwr db status`
pub async fn db_status(paths: &[&str], target: DbTarget) -> Result<()> {
    let r = resolve(paths)?;
    let pool = connect(&r, target).await?;
    let s = vwr_db::status(&pool).await?;
    println!(
        "target={:?} db_ok={} has_ledger_tables={}",
        target, s.ok, s.has_ledger_tables
    );
    Ok(())
}

/// `vwr db migrate`
pub async fn db_migrate(paths: &[&str], target: DbTarget) -> Result<()> {
    let r = resolve(paths)?;
    let pool = connect(&r, target).await?;
    vwr_db::migrate(&pool).await?;
    println!("target={:?} migrations_applied=true", target);
    Ok(())
}
