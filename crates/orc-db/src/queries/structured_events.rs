//! Database query functions for the `run_structured_events` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RunStructuredEvent;

/// Parameters for appending a new structured event.
#[derive(Debug, Clone)]
pub struct NewStructuredEvent {
    pub run_id: Uuid,
    pub sequence: i64,
    pub category: String,
    pub event_type: String,
    pub payload_json: Value,
    pub schema_version: String,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Append a structured event. `sequence` is strictly increasing per
/// `run_id`; callers are responsible for enforcing that invariant before
/// calling (the projector does this on ingestion).
pub async fn append_structured_event(
    pool: &PgPool,
    new: &NewStructuredEvent,
) -> Result<RunStructuredEvent> {
    let event = sqlx::query_as::<_, RunStructuredEvent>(
        "INSERT INTO run_structured_events \
            (run_id, sequence, category, event_type, payload_json, schema_version, summary, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.run_id)
    .bind(new.sequence)
    .bind(&new.category)
    .bind(&new.event_type)
    .bind(&new.payload_json)
    .bind(&new.schema_version)
    .bind(&new.summary)
    .bind(&new.error)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to append structured event for run {} sequence {}",
            new.run_id, new.sequence
        )
    })?;

    Ok(event)
}

/// List structured events for a run in ascending `sequence` order, used to
/// hydrate the projector's in-memory snapshot on first touch.
pub async fn list_structured_events(
    pool: &PgPool,
    run_id: Uuid,
    limit: i64,
) -> Result<Vec<RunStructuredEvent>> {
    let events = sqlx::query_as::<_, RunStructuredEvent>(
        "SELECT * FROM run_structured_events \
         WHERE run_id = $1 \
         ORDER BY sequence ASC \
         LIMIT $2",
    )
    .bind(run_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list structured events for run {run_id}"))?;

    Ok(events)
}

/// Highest applied sequence number for a run, or 0 if none recorded.
pub async fn max_sequence(pool: &PgPool, run_id: Uuid) -> Result<i64> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(sequence) FROM run_structured_events WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to compute max sequence for run {run_id}"))?;

    Ok(row.0.unwrap_or(0))
}
