//! Database query functions for the `maintenance_leases` table.
//!
//! Backs the single-active-instance coordination for periodic maintenance
//! jobs (recovery sweeps, alert checks, cron dispatch): whichever process
//! holds the named lease is the one allowed to run that job this tick.
//! The fencing token increments on every successful acquisition so a holder
//! that stalls past its TTL and later wakes up can tell its token is stale.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::MaintenanceLease;

/// Attempt to acquire or renew a named lease. Succeeds if the lease is
/// unheld, already expired, or already held by `holder`. Returns `None` if
/// another holder's lease is still live.
pub async fn try_acquire_lease(
    pool: &PgPool,
    name: &str,
    holder: &str,
    ttl: chrono::Duration,
) -> Result<Option<MaintenanceLease>> {
    let lease = sqlx::query_as::<_, MaintenanceLease>(
        "INSERT INTO maintenance_leases (name, fencing_token, holder, expires_at) \
         VALUES ($1, 1, $2, now() + $3) \
         ON CONFLICT (name) DO UPDATE SET \
            fencing_token = maintenance_leases.fencing_token + 1, \
            holder = EXCLUDED.holder, \
            expires_at = now() + $3 \
         WHERE maintenance_leases.expires_at < now() OR maintenance_leases.holder = $2 \
         RETURNING *",
    )
    .bind(name)
    .bind(holder)
    .bind(ttl)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to acquire maintenance lease {name}"))?;

    Ok(lease)
}

/// Release a held lease early, only if `holder` still owns it.
pub async fn release_lease(pool: &PgPool, name: &str, holder: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE maintenance_leases SET expires_at = now() WHERE name = $1 AND holder = $2",
    )
    .bind(name)
    .bind(holder)
    .execute(pool)
    .await
    .with_context(|| format!("failed to release maintenance lease {name}"))?;

    Ok(result.rows_affected())
}

/// Fetch a lease by name, for inspection (status commands, tests).
pub async fn get_lease(pool: &PgPool, name: &str) -> Result<Option<MaintenanceLease>> {
    let lease = sqlx::query_as::<_, MaintenanceLease>(
        "SELECT * FROM maintenance_leases WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch maintenance lease {name}"))?;

    Ok(lease)
}
