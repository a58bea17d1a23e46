//! Database query functions for the `workers` table.
//!
//! Lease acquisition is a single atomic compare-and-set on the worker row:
//! the `UPDATE` only succeeds if the row still has spare slots, so two
//! concurrent dispatchers racing for the same worker cannot both win.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Worker;

/// Register or re-register a worker, upserting on `id`.
pub async fn upsert_worker(
    pool: &PgPool,
    id: Uuid,
    endpoint: &str,
    capabilities: &[String],
    max_slots: i32,
) -> Result<Worker> {
    let worker = sqlx::query_as::<_, Worker>(
        "INSERT INTO workers (id, endpoint, status, capabilities, max_slots, active_slots, last_heartbeat) \
         VALUES ($1, $2, 'idle', $3, $4, 0, now()) \
         ON CONFLICT (id) DO UPDATE SET \
            endpoint = EXCLUDED.endpoint, \
            capabilities = EXCLUDED.capabilities, \
            max_slots = EXCLUDED.max_slots, \
            last_heartbeat = now() \
         RETURNING *",
    )
    .bind(id)
    .bind(endpoint)
    .bind(capabilities)
    .bind(max_slots)
    .fetch_one(pool)
    .await
    .context("failed to upsert worker")?;

    Ok(worker)
}

/// Fetch a worker by its ID.
pub async fn get_worker(pool: &PgPool, id: Uuid) -> Result<Option<Worker>> {
    let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch worker")?;

    Ok(worker)
}

/// List every worker, ordered by endpoint.
pub async fn list_workers(pool: &PgPool) -> Result<Vec<Worker>> {
    let workers = sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY endpoint ASC")
        .fetch_all(pool)
        .await
        .context("failed to list workers")?;

    Ok(workers)
}

/// Atomically acquire a slot on the first idle worker advertising `harness`
/// among its capabilities. `NULL`/empty `capabilities` matches every harness.
/// Returns the worker row with `active_slots` already incremented and
/// `status='leased'`, or `None` if no eligible worker has a free slot.
pub async fn acquire_worker_slot(pool: &PgPool, harness: &str) -> Result<Option<Worker>> {
    let worker = sqlx::query_as::<_, Worker>(
        "UPDATE workers SET active_slots = active_slots + 1, status = 'leased' \
         WHERE id = ( \
             SELECT id FROM workers \
             WHERE status IN ('idle', 'leased') \
               AND active_slots < max_slots \
               AND (cardinality(capabilities) = 0 OR $1 = ANY(capabilities)) \
             ORDER BY active_slots ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .bind(harness)
    .fetch_optional(pool)
    .await
    .context("failed to acquire worker slot")?;

    Ok(worker)
}

/// Release a slot on a worker after its held run reaches a terminal state.
/// When the worker reaches zero active slots it transitions back to `idle`.
pub async fn release_worker_slot(pool: &PgPool, worker_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workers SET \
            active_slots = GREATEST(active_slots - 1, 0), \
            status = CASE WHEN active_slots - 1 <= 0 THEN 'idle' ELSE status END \
         WHERE id = $1",
    )
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to release worker slot")?;

    Ok(result.rows_affected())
}

/// Force a worker to a terminal (`draining`) state, used on unrecoverable
/// runtime errors observed by the event stream listener.
pub async fn recycle_worker(pool: &PgPool, worker_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE workers SET status = 'draining', active_slots = 0 WHERE id = $1")
        .bind(worker_id)
        .execute(pool)
        .await
        .context("failed to recycle worker")?;

    Ok(result.rows_affected())
}

/// Update a worker's reported slot usage and heartbeat from a status message.
pub async fn record_worker_status(
    pool: &PgPool,
    worker_id: Uuid,
    active_slots: i32,
    max_slots: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workers SET active_slots = $1, max_slots = $2, last_heartbeat = now() WHERE id = $3",
    )
    .bind(active_slots)
    .bind(max_slots)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to record worker status")?;

    Ok(result.rows_affected())
}

/// Refresh a worker's last-activity timestamp without changing slot counts.
pub async fn record_dispatch_activity(pool: &PgPool, worker_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE workers SET last_heartbeat = now() WHERE id = $1")
        .bind(worker_id)
        .execute(pool)
        .await
        .context("failed to record dispatch activity")?;

    Ok(result.rows_affected())
}

/// List workers whose `last_heartbeat` is older than `threshold`, excluding
/// workers already `offline`. Drives the `MissingHeartbeat` alert.
pub async fn list_stale_heartbeats(
    pool: &PgPool,
    threshold: chrono::Duration,
) -> Result<Vec<Worker>> {
    let cutoff: DateTime<Utc> = Utc::now() - threshold;
    let workers = sqlx::query_as::<_, Worker>(
        "SELECT * FROM workers WHERE status != 'offline' AND last_heartbeat < $1 ORDER BY endpoint ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to list stale heartbeats")?;

    Ok(workers)
}
