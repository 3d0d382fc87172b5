use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use vwr_reconcile::{CounterKey, EventId, Frontiers};

mod frontier;
mod ledger;

pub use frontier::PgFrontierCache;
pub use ledger::PgLedger;

pub const ENV_DB_URL: &str = "VWR_DATABASE_URL";

/// Upper bound on waiting for a pooled connection. A pass that cannot reach
/// a store fails with UPSTREAM_UNAVAILABLE instead of hanging the tick.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to Postgres. `password`, when given, overrides any password in
/// the URL (credentials are never kept in config files).
pub async fn connect(url: &str, password: Option<&str>, max_connections: u32) -> Result<PgPool> {
    let mut opts = PgConnectOptions::from_str(url).context("invalid postgres url")?;
    if let Some(pw) = password {
        opts = opts.password(pw);
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(opts)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ledger_tables: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (tables,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from information_schema.tables
        where table_schema = 'public'
          and table_name in ('queue_positions', 'serving_checkpoints', 'frontier_counters')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_ledger_tables: tables == 3,
    })
}

/// Seed or overwrite all three counters of an event in one transaction.
///
/// Operator tool only: while reconciliation is running the passes are the
/// sole writers of the serving and expiry frontiers.
pub async fn init_frontiers(pool: &PgPool, event_id: &EventId, frontiers: Frontiers) -> Result<()> {
    if frontiers.queue_counter < 0 || frontiers.max_expired < 0 {
        bail!("frontiers must be non-negative: {frontiers}");
    }
    if !frontiers.is_bounded() {
        bail!("frontiers out of order (want max_expired <= serving <= queue): {frontiers}");
    }

    let mut tx = pool.begin().await.context("init_frontiers begin failed")?;
    for key in CounterKey::ALL {
        sqlx::query(
            r#"
            insert into frontier_counters (event_id, counter_key, value)
            values ($1, $2, $3)
            on conflict (event_id, counter_key) do update set value = excluded.value
            "#,
        )
        .bind(event_id.as_str())
        .bind(key.as_str())
        .bind(frontiers.get(key))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("init_frontiers upsert {key} failed"))?;
    }

    // Credit spans open at the checkpoint at or below the expiry frontier;
    // without one the Advancer counts from position 0.
    if frontiers.max_expired > 0 {
        sqlx::query(
            r#"
            insert into serving_checkpoints (
              event_id, serving_counter, issue_time, queue_positions_served
            ) values ($1, $2, now(), 0)
            on conflict (event_id, serving_counter) do nothing
            "#,
        )
        .bind(event_id.as_str())
        .bind(frontiers.max_expired)
        .execute(&mut *tx)
        .await
        .context("init_frontiers boundary checkpoint failed")?;
    }
    tx.commit().await.context("init_frontiers commit failed")?;

    tracing::info!(event_id = %event_id, %frontiers, "frontiers initialised");
    Ok(())
}

/// Record an issued position. The issuer normally does this; exposed for
/// operator backfills and tests.
pub async fn insert_position(
    pool: &PgPool,
    event_id: &EventId,
    position: i64,
    issue_time: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into queue_positions (event_id, queue_position, issue_time)
        values ($1, $2, $3)
        "#,
    )
    .bind(event_id.as_str())
    .bind(position)
    .bind(issue_time)
    .execute(pool)
    .await
    .context("insert_position failed")?;
    Ok(())
}
