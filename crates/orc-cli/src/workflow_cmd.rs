//! `orc workflow` subcommands: start, approve, and reject DAG executions.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use orc_core::config::AdmissionConfig;
use orc_core::workflow::WorkflowEngine;

use crate::dispatch_cmd::build_dispatcher;

fn build_engine(pool: PgPool, admission: AdmissionConfig) -> WorkflowEngine {
    let dispatcher = Arc::new(build_dispatcher(pool.clone(), admission));
    WorkflowEngine::new(pool, dispatcher)
}

/// Start a new execution of `workflow_id`, optionally seeded with
/// `key=value` context pairs.
pub async fn run_start(
    pool: &PgPool,
    admission: AdmissionConfig,
    workflow_id: &str,
    context_pairs: &[String],
) -> anyhow::Result<()> {
    let workflow_id =
        Uuid::parse_str(workflow_id).with_context(|| format!("invalid workflow ID: {workflow_id}"))?;

    let mut context = HashMap::new();
    for pair in context_pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid context pair (expected key=value): {pair}"))?;
        context.insert(key.to_string(), value.to_string());
    }

    let engine = build_engine(pool.clone(), admission);
    let execution_id = engine.start(workflow_id, context).await?;
    println!("Started execution {execution_id}.");
    Ok(())
}

pub async fn run_approve(
    pool: &PgPool,
    admission: AdmissionConfig,
    execution_id: &str,
    approved_by: &str,
) -> anyhow::Result<()> {
    let execution_id = Uuid::parse_str(execution_id)
        .with_context(|| format!("invalid execution ID: {execution_id}"))?;
    let engine = build_engine(pool.clone(), admission);
    engine.approve(execution_id, approved_by).await?;
    println!("Execution {execution_id} approved by {approved_by}.");
    Ok(())
}

pub async fn run_reject(
    pool: &PgPool,
    admission: AdmissionConfig,
    execution_id: &str,
) -> anyhow::Result<()> {
    let execution_id = Uuid::parse_str(execution_id)
        .with_context(|| format!("invalid execution ID: {execution_id}"))?;
    let engine = build_engine(pool.clone(), admission);
    engine.reject(execution_id).await?;
    println!("Execution {execution_id} rejected.");
    Ok(())
}
