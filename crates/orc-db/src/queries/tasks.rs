//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, TaskKind};

/// Parameters for inserting a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub repository_id: Uuid,
    pub harness: String,
    pub prompt: String,
    pub command: Option<String>,
    pub concurrency_limit: i32,
    pub require_approval: bool,
    pub execution_timeout_seconds: i32,
    pub retry_max_attempts: i32,
    pub retry_backoff_base_seconds: i32,
    pub retry_backoff_mult: f64,
    pub artifact_patterns: Vec<String>,
    pub instruction_files: Vec<String>,
    pub kind: TaskKind,
    pub cron_expression: Option<String>,
    pub auto_create_pr: bool,
}

/// Insert a new task row.
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks ( \
            repository_id, harness, prompt, command, concurrency_limit, \
            require_approval, execution_timeout_seconds, retry_max_attempts, \
            retry_backoff_base_seconds, retry_backoff_mult, artifact_patterns, \
            instruction_files, kind, cron_expression, enabled, auto_create_pr \
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, true, $15) \
         RETURNING *",
    )
    .bind(new.repository_id)
    .bind(&new.harness)
    .bind(&new.prompt)
    .bind(&new.command)
    .bind(new.concurrency_limit)
    .bind(new.require_approval)
    .bind(new.execution_timeout_seconds)
    .bind(new.retry_max_attempts)
    .bind(new.retry_backoff_base_seconds)
    .bind(new.retry_backoff_mult)
    .bind(&new.artifact_patterns)
    .bind(&new.instruction_files)
    .bind(new.kind)
    .bind(&new.cron_expression)
    .bind(new.auto_create_pr)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks for a repository, ordered by creation time.
pub async fn list_tasks_for_repository(pool: &PgPool, repository_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE repository_id = $1 ORDER BY created_at ASC",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for repository")?;

    Ok(tasks)
}

/// List all enabled cron tasks, across every repository.
pub async fn list_enabled_cron_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE kind = 'cron' AND enabled = true ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list enabled cron tasks")?;

    Ok(tasks)
}

/// Clear a task's cached git sync error, stamping `last_git_sync_at = now()`.
///
/// Called by the dispatcher at the start of every dispatch attempt.
pub async fn update_task_git_metadata(
    pool: &PgPool,
    task_id: Uuid,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET last_git_sync_at = COALESCE($1, last_git_sync_at), last_git_error = $2 \
         WHERE id = $3",
    )
    .bind(last_sync)
    .bind(last_error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to update task git metadata")?;

    Ok(())
}

/// Count active runs (queued, running, pending_approval) for a task.
pub async fn count_active_runs_for_task(pool: &PgPool, task_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs \
         WHERE task_id = $1 AND state IN ('queued', 'running', 'pending_approval')",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to count active runs for task")?;

    Ok(row.0)
}
