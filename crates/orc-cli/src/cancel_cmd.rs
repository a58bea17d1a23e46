//! `orc cancel` command: cancel a queued or running run.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::queries::runs as run_db;

pub async fn run(pool: &PgPool, run_id: &str) -> anyhow::Result<()> {
    let run_id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
    let rows = run_db::cancel_run(pool, run_id).await?;
    if rows == 0 {
        anyhow::bail!("run {run_id} was not cancellable (not queued/running/pending approval)");
    }
    println!("Run {run_id} cancelled.");
    Ok(())
}
