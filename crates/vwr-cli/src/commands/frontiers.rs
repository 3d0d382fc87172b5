use anyhow::{bail, Result};
use vwr_reconcile::{FaultKind, Frontiers};

use super::{connect, event_context, resolve};
use crate::DbTarget;

/// `vwr frontiers show`
pub async fn show(paths: &[&str]) -> Result<()> {
    let r = resolve(paths)?;
    let ctx = event_context(&r).await?;
    let f = ctx.read_frontiers().await?;
    println!("event_id={}", r.event_id);
    println!("{}", f);
    if !f.is_bounded() {
        println!("WARNING: frontiers out of order (want max_expired <= serving <= queue)");
    }
    Ok(())
}

/// `vwr frontiers init`
pub async fn init(paths: &[&str], frontiers: Frontiers, yes: bool) -> Result<()> {
    let r = resolve(paths)?;
    let ctx = event_context(&r).await?;

    match ctx.read_frontiers().await {
        Ok(existing) if !yes => bail!(
            "REFUSING INIT: event {} already has counters ({}). Re-run with --yes to overwrite",
            r.event_id,
            existing
        ),
        Ok(_) => {}
        Err(e) if e.kind() == FaultKind::InconsistentState => {}
        Err(e) => return Err(e.into()),
    }

    let pool = connect(&r, DbTarget::Cache).await?;
    vwr_db::init_frontiers(&pool, &r.event_id, frontiers).await?;
    println!("event_id={}", r.event_id);
    println!("{}", frontiers);
    Ok(())
}
