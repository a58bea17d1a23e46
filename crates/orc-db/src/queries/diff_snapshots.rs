//! Database query functions for the `run_diff_snapshots` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RunDiffSnapshot;

/// Upsert the diff snapshot for a run, but only when `sequence` is newer
/// than whatever is already stored -- a diff event that arrives out of
/// order must never clobber a later one.
pub async fn upsert_diff_snapshot(
    pool: &PgPool,
    run_id: Uuid,
    sequence: i64,
    diff_stat: &str,
    diff_patch: &str,
) -> Result<Option<RunDiffSnapshot>> {
    let snapshot = sqlx::query_as::<_, RunDiffSnapshot>(
        "INSERT INTO run_diff_snapshots (run_id, sequence, diff_stat, diff_patch, updated_at) \
         VALUES ($1, $2, $3, $4, now()) \
         ON CONFLICT (run_id) DO UPDATE SET \
            sequence = EXCLUDED.sequence, \
            diff_stat = EXCLUDED.diff_stat, \
            diff_patch = EXCLUDED.diff_patch, \
            updated_at = now() \
         WHERE run_diff_snapshots.sequence < EXCLUDED.sequence \
         RETURNING *",
    )
    .bind(run_id)
    .bind(sequence)
    .bind(diff_stat)
    .bind(diff_patch)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to upsert diff snapshot for run {run_id}"))?;

    Ok(snapshot)
}

/// Fetch the current diff snapshot for a run, if one has been recorded.
pub async fn get_diff_snapshot(pool: &PgPool, run_id: Uuid) -> Result<Option<RunDiffSnapshot>> {
    let snapshot =
        sqlx::query_as::<_, RunDiffSnapshot>("SELECT * FROM run_diff_snapshots WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("failed to fetch diff snapshot for run {run_id}"))?;

    Ok(snapshot)
}
