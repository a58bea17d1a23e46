//! Database query functions for the `workflows` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Workflow;

/// Parameters for inserting a new workflow graph definition.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub repository_id: Uuid,
    pub nodes_json: serde_json::Value,
    pub edges_json: serde_json::Value,
    pub trigger_type: String,
    pub trigger_cron: Option<String>,
    pub max_concurrent_nodes: i32,
}

/// Insert a new workflow graph.
pub async fn insert_workflow(pool: &PgPool, new: &NewWorkflow) -> Result<Workflow> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "INSERT INTO workflows \
            (repository_id, nodes_json, edges_json, trigger_type, trigger_cron, \
             max_concurrent_nodes, enabled) \
         VALUES ($1, $2, $3, $4, $5, $6, true) \
         RETURNING *",
    )
    .bind(new.repository_id)
    .bind(&new.nodes_json)
    .bind(&new.edges_json)
    .bind(&new.trigger_type)
    .bind(&new.trigger_cron)
    .bind(new.max_concurrent_nodes)
    .fetch_one(pool)
    .await
    .context("failed to insert workflow")?;

    Ok(workflow)
}

/// Fetch a workflow by ID.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<Option<Workflow>> {
    let workflow = sqlx::query_as::<_, Workflow>("SELECT * FROM workflows WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow")?;

    Ok(workflow)
}

/// List workflows for a repository.
pub async fn list_workflows_for_repository(
    pool: &PgPool,
    repository_id: Uuid,
) -> Result<Vec<Workflow>> {
    let workflows = sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows WHERE repository_id = $1 ORDER BY created_at ASC",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await
    .context("failed to list workflows for repository")?;

    Ok(workflows)
}

/// List every enabled workflow with a cron trigger, across all repositories.
pub async fn list_enabled_cron_workflows(pool: &PgPool) -> Result<Vec<Workflow>> {
    let workflows = sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows \
         WHERE enabled = true AND trigger_type = 'cron' AND trigger_cron IS NOT NULL \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list enabled cron workflows")?;

    Ok(workflows)
}
