//! One-shot passes. Exit status is non-zero on any fault, with the fault
//! kind leading the message.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use vwr_reconcile::{advance_serving_counter, mark_expired_positions, ReconcileError};

use super::{event_context, resolve};

fn parse_payload(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str::<Value>(s).context("invalid --payload JSON"))
        .transpose()
}

fn fault(e: ReconcileError) -> anyhow::Error {
    anyhow!("{}: {e}", e.kind().as_str())
}

/// `vwr expire`
pub async fn expire(paths: &[&str], payload: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    let r = resolve(paths)?;
    let ctx = event_context(&r).await?;

    if let Some(p) = &payload {
        tracing::info!(payload = %p, "expiry pass triggered");
    }
    let pass = mark_expired_positions(&ctx, Utc::now()).await.map_err(fault)?;
    println!("{}", serde_json::to_string_pretty(&pass)?);
    Ok(())
}

/// `vwr advance`
pub async fn advance(paths: &[&str], payload: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    let r = resolve(paths)?;
    let ctx = event_context(&r).await?;

    if let Some(p) = &payload {
        tracing::info!(payload = %p, "advance pass triggered");
    }
    let pass = advance_serving_counter(&ctx, Utc::now()).await.map_err(fault)?;
    println!("{}", serde_json::to_string_pretty(&pass)?);
    Ok(())
}
