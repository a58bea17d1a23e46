//! Lease coordinator (C9): a named distributed mutex single-threading
//! maintenance cycles (recovery sweeps, alert checks, cron dispatch) across
//! replicas.

use chrono::Duration;
use sqlx::PgPool;

use orc_db::models::MaintenanceLease;
use orc_db::queries::leases;

/// A held maintenance lease. Dropping it releases the lease best-effort via
/// a detached task; call `release` directly to await the release instead.
pub struct MaintenanceGuard {
    pool: PgPool,
    name: String,
    holder: String,
    pub fencing_token: i64,
}

impl MaintenanceGuard {
    pub async fn release(self) -> anyhow::Result<()> {
        leases::release_lease(&self.pool, &self.name, &self.holder).await?;
        Ok(())
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let name = self.name.clone();
        let holder = self.holder.clone();
        tokio::spawn(async move {
            if let Err(e) = leases::release_lease(&pool, &name, &holder).await {
                tracing::warn!(lease = %name, error = %e, "failed to release maintenance lease on drop");
            }
        });
    }
}

pub struct MaintenanceCoordinator {
    pool: PgPool,
    holder: String,
}

impl MaintenanceCoordinator {
    pub fn new(pool: PgPool, holder: impl Into<String>) -> Self {
        Self {
            pool,
            holder: holder.into(),
        }
    }

    /// Attempt to acquire `name` for `ttl`. Returns `None` if another
    /// replica already holds it.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<MaintenanceGuard>> {
        let lease = leases::try_acquire_lease(&self.pool, name, &self.holder, ttl).await?;
        Ok(lease.map(|l: MaintenanceLease| MaintenanceGuard {
            pool: self.pool.clone(),
            name: l.name,
            holder: self.holder.clone(),
            fencing_token: l.fencing_token,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_carries_its_holder_identity() {
        // Exercised fully by store-backed integration tests; this just
        // pins the constructor's signature.
        let _ = |pool: PgPool| MaintenanceCoordinator::new(pool, "replica-1");
    }
}
