//! `orc dispatch` command: run the admission pipeline over queued runs.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;

use orc_core::config::AdmissionConfig;
use orc_core::dispatcher::{DispatchOutcome, Dispatcher};
use orc_db::models::RunState;
use orc_db::queries::runs as run_db;

use crate::runtime_stub::{IdentitySecretCrypto, LoggingRuntimeClient, TracingEventPublisher};

/// Build a `Dispatcher` wired to the logging stand-ins for the collaborators
/// this codebase treats as external (runtime fleet, secret crypto, event
/// bus).
pub fn build_dispatcher(pool: PgPool, admission: AdmissionConfig) -> Dispatcher {
    Dispatcher::new(
        pool,
        Arc::new(LoggingRuntimeClient),
        Arc::new(IdentitySecretCrypto),
        Arc::new(TracingEventPublisher),
        admission,
    )
}

/// Run one admission pass over every queued run.
pub async fn run_tick(pool: &PgPool, admission: AdmissionConfig) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(pool.clone(), admission);
    let queued = run_db::list_runs_by_state(pool, RunState::Queued).await?;

    if queued.is_empty() {
        println!("No queued runs.");
        return Ok(());
    }

    for run in &queued {
        let outcome = dispatcher.dispatch(run.id, &HashMap::new()).await?;
        match &outcome {
            DispatchOutcome::Dispatched => println!("run {}: dispatched", run.id),
            DispatchOutcome::LeftQueued => println!("run {}: left queued", run.id),
            DispatchOutcome::MarkedPendingApproval => {
                println!("run {}: awaiting approval", run.id)
            }
            DispatchOutcome::Failed { reason } => println!("run {}: failed ({reason})", run.id),
        }
    }

    Ok(())
}

/// Run admission passes on a fixed interval until cancelled (Ctrl+C).
pub async fn run_loop(pool: &PgPool, admission: AdmissionConfig, interval_secs: u64) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_tick(pool, admission.clone()).await {
                    tracing::error!(error = %e, "dispatch tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down dispatch loop.");
                return Ok(());
            }
        }
    }
}
