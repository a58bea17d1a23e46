//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Project;

/// Insert a new project row.
pub async fn insert_project(pool: &PgPool, name: &str) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name) VALUES ($1) RETURNING *",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by its ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List all projects, ordered by creation time.
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at ASC")
        .fetch_all(pool)
        .await
        .context("failed to list projects")?;

    Ok(projects)
}

/// Count active runs across every repository in a project.
///
/// "Active" means not yet in a terminal state: `queued`, `running`, or
/// `pending_approval`.
pub async fn count_active_runs_for_project(pool: &PgPool, project_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM runs r \
         JOIN repositories repo ON repo.id = r.repository_id \
         WHERE repo.project_id = $1 \
           AND r.state IN ('queued', 'running', 'pending_approval')",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to count active runs for project")?;

    Ok(row.0)
}
