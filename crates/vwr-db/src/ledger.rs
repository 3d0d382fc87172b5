use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use vwr_reconcile::{EventId, PositionLedger, PositionRecord, ServingCheckpoint, StoreError};

const BACKEND: &str = "ledger";

/// Durable position ledger: `queue_positions` + `serving_checkpoints`.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(BACKEND, e)
}

fn position_from_row(event_id: &EventId, row: &PgRow) -> Result<PositionRecord, sqlx::Error> {
    Ok(PositionRecord {
        event_id: event_id.clone(),
        position: row.try_get("queue_position")?,
        issue_time: row.try_get::<DateTime<Utc>, _>("issue_time")?,
        expired: row.try_get("expired")?,
    })
}

fn checkpoint_from_row(event_id: &EventId, row: &PgRow) -> Result<ServingCheckpoint, sqlx::Error> {
    Ok(ServingCheckpoint {
        event_id: event_id.clone(),
        serving_counter: row.try_get("serving_counter")?,
        issue_time: row.try_get::<DateTime<Utc>, _>("issue_time")?,
        positions_served: row.try_get("queue_positions_served")?,
    })
}

#[async_trait]
impl PositionLedger for PgLedger {
    async fn unexpired_positions(
        &self,
        event_id: &EventId,
        range: Range<i64>,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            select queue_position, issue_time, expired
            from queue_positions
            where event_id = $1
              and queue_position >= $2
              and queue_position < $3
              and expired = false
            order by queue_position desc
            "#,
        )
        .bind(event_id.as_str())
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|r| position_from_row(event_id, r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)
    }

    async fn position(
        &self,
        event_id: &EventId,
        position: i64,
    ) -> Result<Option<PositionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            select queue_position, issue_time, expired
            from queue_positions
            where event_id = $1 and queue_position = $2
            "#,
        )
        .bind(event_id.as_str())
        .bind(position)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|r| position_from_row(event_id, &r))
            .transpose()
            .map_err(unavailable)
    }

    async fn mark_expired(&self, event_id: &EventId, position: i64) -> Result<bool, StoreError> {
        // The expired = false guard makes overlapping runs count each row once.
        let res = sqlx::query(
            r#"
            update queue_positions
            set expired = true
            where event_id = $1 and queue_position = $2 and expired = false
            "#,
        )
        .bind(event_id.as_str())
        .bind(position)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(res.rows_affected() == 1)
    }

    async fn checkpoints_after(
        &self,
        event_id: &EventId,
        after: i64,
    ) -> Result<Vec<ServingCheckpoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            select serving_counter, issue_time, queue_positions_served
            from serving_checkpoints
            where event_id = $1 and serving_counter > $2
            order by serving_counter asc
            "#,
        )
        .bind(event_id.as_str())
        .bind(after)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|r| checkpoint_from_row(event_id, r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)
    }

    async fn first_checkpoint_at_or_after(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            select serving_counter, issue_time, queue_positions_served
            from serving_checkpoints
            where event_id = $1 and serving_counter >= $2
            order by serving_counter asc
            limit 1
            "#,
        )
        .bind(event_id.as_str())
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|r| checkpoint_from_row(event_id, &r))
            .transpose()
            .map_err(unavailable)
    }

    async fn last_checkpoint_at_or_before(
        &self,
        event_id: &EventId,
        value: i64,
    ) -> Result<Option<ServingCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            select serving_counter, issue_time, queue_positions_served
            from serving_checkpoints
            where event_id = $1 and serving_counter <= $2
            order by serving_counter desc
            limit 1
            "#,
        )
        .bind(event_id.as_str())
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|r| checkpoint_from_row(event_id, &r))
            .transpose()
            .map_err(unavailable)
    }

    async fn put_checkpoint(&self, checkpoint: &ServingCheckpoint) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into serving_checkpoints (
              event_id, serving_counter, issue_time, queue_positions_served
            ) values ($1, $2, $3, $4)
            on conflict (event_id, serving_counter) do nothing
            "#,
        )
        .bind(checkpoint.event_id.as_str())
        .bind(checkpoint.serving_counter)
        .bind(checkpoint.issue_time)
        .bind(checkpoint.positions_served)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if res.rows_affected() == 0 {
            tracing::warn!(
                event_id = %checkpoint.event_id,
                serving_counter = checkpoint.serving_counter,
                "checkpoint already present; kept existing row"
            );
        }
        Ok(())
    }
}
