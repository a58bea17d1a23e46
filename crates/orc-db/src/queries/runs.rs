//! Database query functions for the `runs` table.
//!
//! Run state transitions are store-side atomic compare-and-set: the `UPDATE`
//! statement's `WHERE` clause always pins the expected current state, so a
//! concurrent writer racing on the same row only ever wins once. Callers
//! that observe zero rows affected must re-read and re-decide rather than
//! force the transition.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExecutionMode, FailureClassification, Run, RunState};

/// Insert a new run in `Queued` state.
pub async fn insert_run(
    pool: &PgPool,
    task_id: Uuid,
    repository_id: Uuid,
    attempt: i32,
    execution_mode: ExecutionMode,
) -> Result<Run> {
    let run = sqlx::query_as::<_, Run>(
        "INSERT INTO runs (task_id, repository_id, state, attempt, execution_mode) \
         VALUES ($1, $2, 'queued', $3, $4) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(repository_id)
    .bind(attempt)
    .bind(execution_mode)
    .fetch_one(pool)
    .await
    .context("failed to insert run")?;

    Ok(run)
}

/// Fetch a run by its ID.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run")?;

    Ok(run)
}

/// List a task's runs ordered by `(created_at, id)` ascending -- the
/// ordering the queue-head rule is evaluated against.
pub async fn list_runs_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "SELECT * FROM runs WHERE task_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list runs for task")?;

    Ok(runs)
}

/// List all runs currently in the given state.
pub async fn list_runs_by_state(pool: &PgPool, state: RunState) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE state = $1 ORDER BY created_at ASC")
        .bind(state)
        .fetch_all(pool)
        .await
        .context("failed to list runs by state")?;

    Ok(runs)
}

/// The oldest non-terminal run for a task, by `(created_at, id)` -- the
/// queue head. `None` if the task has no queue-active runs.
pub async fn get_queue_head(pool: &PgPool, task_id: Uuid) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>(
        "SELECT * FROM runs \
         WHERE task_id = $1 AND state IN ('queued', 'running', 'pending_approval') \
         ORDER BY created_at ASC, id ASC \
         LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch queue head")?;

    Ok(run)
}

/// Count of active (non-terminal) runs across the whole system.
pub async fn count_active_runs(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs WHERE state IN ('queued', 'running', 'pending_approval')",
    )
    .fetch_one(pool)
    .await
    .context("failed to count active runs")?;

    Ok(row.0)
}

/// Atomically transition a run from `expected` to `to`. Returns the number
/// of rows affected (0 means `expected` no longer matched -- a CAS failure).
pub async fn transition_run_state(
    pool: &PgPool,
    run_id: Uuid,
    expected: RunState,
    to: RunState,
) -> Result<u64> {
    let result = sqlx::query("UPDATE runs SET state = $1 WHERE id = $2 AND state = $3")
        .bind(to)
        .bind(run_id)
        .bind(expected)
        .execute(pool)
        .await
        .context("failed to transition run state")?;

    Ok(result.rows_affected())
}

/// Mark a run `Running`, stamping `started_at` and binding it to a worker.
/// CAS-guarded on the run still being `Queued`.
pub async fn mark_run_started(
    pool: &PgPool,
    run_id: Uuid,
    worker_id: Uuid,
    container_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs \
         SET state = 'running', worker_id = $1, container_id = $2, started_at = now() \
         WHERE id = $3 AND state = 'queued'",
    )
    .bind(worker_id)
    .bind(container_id)
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to mark run started")?;

    Ok(result.rows_affected())
}

/// Mark a run `PendingApproval`. CAS-guarded on the run still being `Queued`.
pub async fn mark_run_pending_approval(pool: &PgPool, run_id: Uuid) -> Result<u64> {
    transition_run_state(pool, run_id, RunState::Queued, RunState::PendingApproval).await
}

/// Mark a run complete: `Succeeded` or `Failed`, stamping `ended_at` and
/// recording the outcome. Not CAS-guarded on the prior state -- a run may
/// complete from either `Running` or `PendingApproval` depending on path.
#[allow(clippy::too_many_arguments)]
pub async fn mark_run_completed(
    pool: &PgPool,
    run_id: Uuid,
    succeeded: bool,
    reason: Option<&str>,
    output_json: Option<&serde_json::Value>,
    failure_class: Option<FailureClassification>,
    pr_url: Option<&str>,
) -> Result<Run> {
    let state = if succeeded {
        RunState::Succeeded
    } else {
        RunState::Failed
    };

    let run = sqlx::query_as::<_, Run>(
        "UPDATE runs \
         SET state = $1, ended_at = now(), failure_reason = $2, output_json = $3, \
             failure_classification = $4, pr_url = COALESCE($5, pr_url), \
             summary = COALESCE($2, summary) \
         WHERE id = $6 \
         RETURNING *",
    )
    .bind(state)
    .bind(reason)
    .bind(output_json)
    .bind(failure_class)
    .bind(pr_url)
    .bind(run_id)
    .fetch_one(pool)
    .await
    .context("failed to mark run completed")?;

    Ok(run)
}

/// Mark a run `Obsolete`, stamping `ended_at`. Used when the runtime
/// signals `runDisposition=obsolete` on completion.
pub async fn mark_run_obsolete(pool: &PgPool, run_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE runs SET state = 'obsolete', ended_at = now() WHERE id = $1")
        .bind(run_id)
        .execute(pool)
        .await
        .context("failed to mark run obsolete")?;

    Ok(result.rows_affected())
}

/// Cancel a run from any non-terminal state.
pub async fn cancel_run(pool: &PgPool, run_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs SET state = 'cancelled', ended_at = now() \
         WHERE id = $1 AND state IN ('queued', 'running', 'pending_approval')",
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to cancel run")?;

    Ok(result.rows_affected())
}

/// Mark every run in `Running` or `Queued` that belongs to none of the
/// given live worker ids as `Failed` with the orphan-recovery reason.
/// Used by the recovery service on startup.
pub async fn reap_orphaned_runs(pool: &PgPool, live_worker_ids: &[Uuid]) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "UPDATE runs \
         SET state = 'failed', ended_at = now(), \
             failure_reason = 'Orphaned run recovered on startup', \
             failure_classification = 'orphan_recovery' \
         WHERE state IN ('queued', 'running') \
           AND (worker_id IS NULL OR worker_id != ALL($1)) \
         RETURNING *",
    )
    .bind(live_worker_ids)
    .fetch_all(pool)
    .await
    .context("failed to reap orphaned runs")?;

    Ok(runs)
}

/// Mark runs that have been `Running` longer than `threshold` as `Failed`
/// with the given classification. Shared implementation for the stale,
/// zombie, and overdue detectors -- idempotent, since a run already moved
/// to `Failed` no longer matches the `WHERE` clause.
pub async fn fail_long_running(
    pool: &PgPool,
    threshold: chrono::Duration,
    classification: FailureClassification,
    reason: &str,
) -> Result<Vec<Run>> {
    let cutoff: DateTime<Utc> = Utc::now() - threshold;
    let runs = sqlx::query_as::<_, Run>(
        "UPDATE runs \
         SET state = 'failed', ended_at = now(), \
             failure_reason = $1, failure_classification = $2 \
         WHERE state = 'running' AND started_at < $3 \
         RETURNING *",
    )
    .bind(reason)
    .bind(classification)
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to fail long running runs")?;

    Ok(runs)
}

/// Count runs that ended in `Failed` state within the given trailing window.
pub async fn count_failed_since(pool: &PgPool, window: chrono::Duration) -> Result<i64> {
    let since: DateTime<Utc> = Utc::now() - window;
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs WHERE state = 'failed' AND ended_at >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await
    .context("failed to count failed runs since window")?;

    Ok(row.0)
}

/// Count failed runs with a non-empty `pr_url`, grouped by repository, for
/// the `RepeatedPrFailures` alert.
pub async fn count_failed_pr_runs_by_repo(
    pool: &PgPool,
    window: chrono::Duration,
) -> Result<Vec<(Uuid, i64)>> {
    let since: DateTime<Utc> = Utc::now() - window;
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT repository_id, COUNT(*) FROM runs \
         WHERE state = 'failed' AND ended_at >= $1 \
           AND pr_url IS NOT NULL AND pr_url != '' \
         GROUP BY repository_id",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to count failed PR runs by repository")?;

    Ok(rows)
}

/// Count runs created within the window whose `output_json` text contains
/// an `http://` or `https://` URL scheme, for the `RouteLeakDetection` alert.
pub async fn count_route_leak_candidates(pool: &PgPool, window: chrono::Duration) -> Result<i64> {
    let since: DateTime<Utc> = Utc::now() - window;
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs \
         WHERE created_at >= $1 \
           AND output_json IS NOT NULL \
           AND (output_json::text ILIKE '%http://%' OR output_json::text ILIKE '%https://%')",
    )
    .bind(since)
    .fetch_one(pool)
    .await
    .context("failed to count route leak candidates")?;

    Ok(row.0)
}
