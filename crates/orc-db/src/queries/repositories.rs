//! Database query functions for the `repositories` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Repository;

/// Insert a new repository row.
pub async fn insert_repository(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    git_url: &str,
    default_branch: &str,
    instruction_files: &[String],
) -> Result<Repository> {
    let repo = sqlx::query_as::<_, Repository>(
        "INSERT INTO repositories (project_id, name, git_url, default_branch, instruction_files) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(name)
    .bind(git_url)
    .bind(default_branch)
    .bind(instruction_files)
    .fetch_one(pool)
    .await
    .context("failed to insert repository")?;

    Ok(repo)
}

/// Fetch a repository by its ID.
pub async fn get_repository(pool: &PgPool, id: Uuid) -> Result<Option<Repository>> {
    let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch repository")?;

    Ok(repo)
}

/// List all repositories belonging to a project.
pub async fn list_repositories_for_project(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Repository>> {
    let repos = sqlx::query_as::<_, Repository>(
        "SELECT * FROM repositories WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list repositories for project")?;

    Ok(repos)
}

/// Count active runs (queued, running, pending_approval) against a repository.
pub async fn count_active_runs_for_repo(pool: &PgPool, repository_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs \
         WHERE repository_id = $1 \
           AND state IN ('queued', 'running', 'pending_approval')",
    )
    .bind(repository_id)
    .fetch_one(pool)
    .await
    .context("failed to count active runs for repository")?;

    Ok(row.0)
}
