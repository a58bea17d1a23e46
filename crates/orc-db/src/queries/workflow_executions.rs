//! Database query functions for the `workflow_executions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{WorkflowExecution, WorkflowExecutionState};

/// Start a new execution of a workflow graph.
pub async fn insert_workflow_execution(
    pool: &PgPool,
    workflow_id: Uuid,
    context_json: &serde_json::Value,
) -> Result<WorkflowExecution> {
    let execution = sqlx::query_as::<_, WorkflowExecution>(
        "INSERT INTO workflow_executions \
            (workflow_id, state, node_results_json, context_json) \
         VALUES ($1, 'running', '{}'::jsonb, $2) \
         RETURNING *",
    )
    .bind(workflow_id)
    .bind(context_json)
    .fetch_one(pool)
    .await
    .context("failed to insert workflow execution")?;

    Ok(execution)
}

/// Fetch a workflow execution by ID.
pub async fn get_workflow_execution(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowExecution>> {
    let execution =
        sqlx::query_as::<_, WorkflowExecution>("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch workflow execution")?;

    Ok(execution)
}

/// List executions currently awaiting a human approval decision.
pub async fn list_pending_approval_executions(pool: &PgPool) -> Result<Vec<WorkflowExecution>> {
    let executions = sqlx::query_as::<_, WorkflowExecution>(
        "SELECT * FROM workflow_executions WHERE state = 'pending_approval' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list pending-approval executions")?;

    Ok(executions)
}

/// List executions still in flight (`running` or `pending_approval`), used
/// by the recovery service to re-tick a workflow after a restart.
pub async fn list_active_executions(pool: &PgPool) -> Result<Vec<WorkflowExecution>> {
    let executions = sqlx::query_as::<_, WorkflowExecution>(
        "SELECT * FROM workflow_executions \
         WHERE state IN ('running', 'pending_approval') \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list active workflow executions")?;

    Ok(executions)
}

/// Persist an updated node-results map and execution-wide context after a
/// node completes.
pub async fn update_execution_progress(
    pool: &PgPool,
    id: Uuid,
    node_results_json: &serde_json::Value,
    context_json: &serde_json::Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_executions SET node_results_json = $1, context_json = $2 WHERE id = $3",
    )
    .bind(node_results_json)
    .bind(context_json)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update workflow execution progress")?;

    Ok(result.rows_affected())
}

/// Park an execution awaiting manual approval on a specific node.
pub async fn mark_pending_approval(pool: &PgPool, id: Uuid, node_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_executions SET state = 'pending_approval', pending_approval_node_id = $1 \
         WHERE id = $2 AND state = 'running'",
    )
    .bind(node_id)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark execution pending approval")?;

    Ok(result.rows_affected())
}

/// Resume an execution from `pending_approval` back to `running`, recording
/// who approved it.
pub async fn resolve_approval(pool: &PgPool, id: Uuid, approved_by: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_executions \
         SET state = 'running', approved_by = $1, pending_approval_node_id = NULL \
         WHERE id = $2 AND state = 'pending_approval'",
    )
    .bind(approved_by)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to resolve workflow approval")?;

    Ok(result.rows_affected())
}

/// Finalize an execution's terminal state.
pub async fn mark_execution_finished(
    pool: &PgPool,
    id: Uuid,
    state: WorkflowExecutionState,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_executions SET state = $1, ended_at = now() \
         WHERE id = $2 AND state IN ('running', 'pending_approval')",
    )
    .bind(state)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark workflow execution finished")?;

    Ok(result.rows_affected())
}
