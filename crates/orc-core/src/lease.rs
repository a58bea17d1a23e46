//! Runtime lease coordinator (C2): acquires and releases slots on
//! containerised task runtimes, enforcing per-worker slot budgets.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::models::Worker;
use orc_db::queries::workers;

/// An exclusive right to schedule one run on a runtime until terminal.
#[derive(Debug, Clone)]
pub struct Lease {
    pub worker_id: Uuid,
    pub runtime_endpoint: String,
}

/// Outcome of attempting to acquire a lease for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired { worker_id: Uuid, runtime_endpoint: String },
    /// No eligible runtime had a free slot.
    None,
}

pub struct LeaseCoordinator {
    pool: PgPool,
}

impl LeaseCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically acquire a slot on the first eligible idle/leased runtime
    /// advertising `harness`. The acquisition itself is a single
    /// compare-and-set on the worker row (see `workers::acquire_worker_slot`),
    /// so two concurrent dispatches can never both win the same slot.
    pub async fn acquire_for_dispatch(&self, harness: &str) -> Result<LeaseOutcome> {
        let worker = workers::acquire_worker_slot(&self.pool, harness).await?;
        Ok(match worker {
            Some(w) => LeaseOutcome::Acquired {
                worker_id: w.id,
                runtime_endpoint: w.endpoint,
            },
            None => LeaseOutcome::None,
        })
    }

    /// Refresh a runtime's last-activity timestamp.
    pub async fn record_dispatch_activity(&self, worker_id: Uuid) -> Result<()> {
        workers::record_dispatch_activity(&self.pool, worker_id).await?;
        Ok(())
    }

    /// Release a slot after its held run reaches a terminal state. The only
    /// supported recycle policy is release-on-terminal: a worker reaching
    /// zero active slots transitions back to `Idle` automatically.
    pub async fn release_on_run_terminal(&self, worker_id: Uuid) -> Result<()> {
        workers::release_worker_slot(&self.pool, worker_id).await?;
        Ok(())
    }

    /// Force a runtime to a terminal (draining) state after an unrecoverable
    /// error observed by the event stream listener.
    pub async fn recycle(&self, worker_id: Uuid) -> Result<()> {
        workers::recycle_worker(&self.pool, worker_id).await?;
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: Uuid) -> Result<Option<Worker>> {
        workers::get_worker(&self.pool, worker_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_outcome_acquired_carries_endpoint() {
        let outcome = LeaseOutcome::Acquired {
            worker_id: Uuid::nil(),
            runtime_endpoint: "http://worker-1:9000".to_string(),
        };
        match outcome {
            LeaseOutcome::Acquired { runtime_endpoint, .. } => {
                assert_eq!(runtime_endpoint, "http://worker-1:9000");
            }
            LeaseOutcome::None => panic!("expected Acquired"),
        }
    }
}
