//! `orc recover` command: startup orphan reap plus a periodic dead-run sweep.

use std::sync::Arc;

use sqlx::PgPool;

use orc_core::config::DeadRunDetectionConfig;
use orc_core::recovery::RecoveryService;

use crate::runtime_stub::{LoggingRuntimeClient, TracingNotifier};

fn build_service(pool: PgPool, config: DeadRunDetectionConfig) -> RecoveryService {
    RecoveryService::new(
        pool,
        Arc::new(LoggingRuntimeClient),
        Arc::new(TracingNotifier),
        config,
    )
}

/// Reap orphaned runs (runs assigned to workers that no longer exist), then
/// run one stale/zombie/overdue sweep.
pub async fn run_once(pool: &PgPool, config: DeadRunDetectionConfig) -> anyhow::Result<()> {
    let service = build_service(pool.clone(), config);

    let orphaned = service.reap_orphans().await?;
    println!("Reaped {} orphaned run(s).", orphaned.len());

    let report = service.run_tick().await?;
    println!(
        "Recovery sweep: {} stale, {} zombie, {} overdue ({} total).",
        report.stale.len(),
        report.zombie.len(),
        report.overdue.len(),
        report.total()
    );

    Ok(())
}
