//! Recovery service (C6): reclaims runs orphaned by a crashed control plane
//! at startup, then periodically fails stale/zombie/overdue runs still
//! claiming to be `Running`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::models::{FailureClassification, Run};
use orc_db::queries::{runs as run_db, workers};

use crate::config::DeadRunDetectionConfig;
use crate::traits::{ContainerReaper, Notifier};

/// Runs reclaimed or failed by one recovery pass, surfaced for logging and
/// tests.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub orphaned: Vec<Run>,
    pub stale: Vec<Run>,
    pub zombie: Vec<Run>,
    pub overdue: Vec<Run>,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.orphaned.len() + self.stale.len() + self.zombie.len() + self.overdue.len()
    }
}

pub struct RecoveryService {
    pool: PgPool,
    reaper: Arc<dyn ContainerReaper>,
    notifier: Arc<dyn Notifier>,
    config: DeadRunDetectionConfig,
}

impl RecoveryService {
    pub fn new(
        pool: PgPool,
        reaper: Arc<dyn ContainerReaper>,
        notifier: Arc<dyn Notifier>,
        config: DeadRunDetectionConfig,
    ) -> Self {
        Self {
            pool,
            reaper,
            notifier,
            config,
        }
    }

    /// Reclaim every `Running`/`Queued` run not represented by a currently
    /// live worker. Call once at process startup, before dispatch resumes.
    pub async fn reap_orphans(&self) -> Result<Vec<Run>> {
        let live_workers = workers::list_workers(&self.pool).await?;
        let live_worker_ids: Vec<Uuid> = live_workers.iter().map(|w| w.id).collect();

        let orphaned = run_db::reap_orphaned_runs(&self.pool, &live_worker_ids).await?;
        for run in &orphaned {
            self.notify_finding(run, "Orphaned run recovered on startup").await;
        }
        Ok(orphaned)
    }

    /// Run the stale/zombie/overdue detectors once. Each is idempotent and
    /// order-independent: a run failed by an earlier detector no longer
    /// matches a later one's `WHERE state = 'running'` clause.
    pub async fn run_tick(&self) -> Result<RecoveryReport> {
        if !self.config.enable_auto_termination {
            return Ok(RecoveryReport::default());
        }

        let stale = run_db::fail_long_running(
            &self.pool,
            Duration::minutes(self.config.stale_run_threshold_minutes),
            FailureClassification::StaleRun,
            "Run exceeded stale threshold",
        )
        .await?;
        for run in &stale {
            self.notify_finding(run, "Run exceeded stale threshold").await;
        }

        let zombie = run_db::fail_long_running(
            &self.pool,
            Duration::minutes(self.config.zombie_run_threshold_minutes),
            FailureClassification::ZombieRun,
            "Run exceeded zombie threshold",
        )
        .await?;
        for run in &zombie {
            self.kill_if_configured(run).await;
            self.notify_finding(run, "Run exceeded zombie threshold").await;
        }

        let overdue = run_db::fail_long_running(
            &self.pool,
            Duration::hours(self.config.max_run_age_hours),
            FailureClassification::OverdueRun,
            "Run exceeded maximum age",
        )
        .await?;
        for run in &overdue {
            self.kill_if_configured(run).await;
            self.notify_finding(run, "Run exceeded maximum age").await;
        }

        Ok(RecoveryReport { orphaned: Vec::new(), stale, zombie, overdue })
    }

    async fn kill_if_configured(&self, run: &Run) {
        if !self.config.force_kill_on_timeout {
            return;
        }
        let (Some(worker_id), Some(container_id)) = (run.worker_id, run.container_id.as_deref()) else {
            return;
        };
        if let Err(e) = self.reaper.kill(worker_id, container_id, "recovery timeout").await {
            tracing::warn!(run_id = %run.id, error = %e, "failed to kill container on timeout");
        }
    }

    async fn notify_finding(&self, run: &Run, reason: &str) {
        tracing::warn!(run_id = %run.id, reason = %reason, "run failed by recovery service");
        self.notifier
            .notify("Run recovered", &format!("run {}: {reason}", run.id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_total_sums_all_categories() {
        let report = RecoveryReport {
            orphaned: vec![],
            stale: vec![],
            zombie: vec![],
            overdue: vec![],
        };
        assert_eq!(report.total(), 0);
    }
}
