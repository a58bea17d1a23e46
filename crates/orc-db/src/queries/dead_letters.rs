//! Database query functions for the `dead_letters` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::DeadLetter;

/// Record a dead-lettered workflow node, capturing enough context to replay
/// it later.
pub async fn insert_dead_letter(
    pool: &PgPool,
    execution_id: Uuid,
    workflow_id: Uuid,
    failed_node_id: &str,
    attempt: i32,
    input_context_snapshot: &serde_json::Value,
) -> Result<DeadLetter> {
    let dead_letter = sqlx::query_as::<_, DeadLetter>(
        "INSERT INTO dead_letters \
            (execution_id, workflow_id, failed_node_id, attempt, input_context_snapshot, replayed) \
         VALUES ($1, $2, $3, $4, $5, false) \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(workflow_id)
    .bind(failed_node_id)
    .bind(attempt)
    .bind(input_context_snapshot)
    .fetch_one(pool)
    .await
    .context("failed to insert dead letter")?;

    Ok(dead_letter)
}

/// List dead letters not yet replayed, oldest first.
pub async fn list_pending_dead_letters(pool: &PgPool) -> Result<Vec<DeadLetter>> {
    let rows = sqlx::query_as::<_, DeadLetter>(
        "SELECT * FROM dead_letters WHERE replayed = false ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list pending dead letters")?;

    Ok(rows)
}

/// Mark a dead letter as replayed, linking the execution it was replayed into.
pub async fn mark_dead_letter_replayed(
    pool: &PgPool,
    id: Uuid,
    replayed_execution_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE dead_letters SET replayed = true, replayed_execution_id = $1 \
         WHERE id = $2 AND replayed = false",
    )
    .bind(replayed_execution_id)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark dead letter replayed")?;

    Ok(result.rows_affected())
}
