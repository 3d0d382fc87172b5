//! Frontier counters in the `frontier_counters` table.
//!
//! Each method is a single statement, so increments and compare-and-set are
//! atomic under concurrent writers without explicit locking.

use async_trait::async_trait;
use sqlx::PgPool;
use vwr_reconcile::{CasOutcome, CounterKey, EventId, FrontierCache, StoreError};

const BACKEND: &str = "cache";

/// Counter store scoped to one event.
#[derive(Debug, Clone)]
pub struct PgFrontierCache {
    pool: PgPool,
    event_id: EventId,
}

impl PgFrontierCache {
    pub fn new(pool: PgPool, event_id: EventId) -> Self {
        Self { pool, event_id }
    }

    async fn fetch(&self, key: CounterKey) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            select value
            from frontier_counters
            where event_id = $1 and counter_key = $2
            "#,
        )
        .bind(self.event_id.as_str())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        Ok(row.map(|(v,)| v))
    }
}

#[async_trait]
impl FrontierCache for PgFrontierCache {
    async fn get(&self, key: CounterKey) -> Result<i64, StoreError> {
        self.fetch(key)
            .await?
            .ok_or(StoreError::MissingCounter { key })
    }

    async fn set(&self, key: CounterKey, value: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into frontier_counters (event_id, counter_key, value)
            values ($1, $2, $3)
            on conflict (event_id, counter_key) do update set value = excluded.value
            "#,
        )
        .bind(self.event_id.as_str())
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        Ok(())
    }

    async fn incr_by(&self, key: CounterKey, delta: i64) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            update frontier_counters
            set value = value + $3
            where event_id = $1 and counter_key = $2
            returning value
            "#,
        )
        .bind(self.event_id.as_str())
        .bind(key.as_str())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        row.map(|(v,)| v).ok_or(StoreError::MissingCounter { key })
    }

    async fn compare_and_set(
        &self,
        key: CounterKey,
        expected: i64,
        new: i64,
    ) -> Result<CasOutcome, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            update frontier_counters
            set value = $4
            where event_id = $1 and counter_key = $2 and value = $3
            returning value
            "#,
        )
        .bind(self.event_id.as_str())
        .bind(key.as_str())
        .bind(expected)
        .bind(new)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        if row.is_some() {
            return Ok(CasOutcome::Applied);
        }
        // Either someone else moved it or it was never written.
        let actual = self.get(key).await?;
        Ok(CasOutcome::Mismatch { actual })
    }
}
