//! `orc listen` command: drain runtime event streams into the control plane
//! (C3).

use std::sync::Arc;

use sqlx::PgPool;

use orc_core::config::AdmissionConfig;
use orc_core::listener::Listener;
use orc_core::projector::ProjectionCache;
use orc_core::traits::RuntimeClient;
use orc_db::models::WorkerStatus;
use orc_db::queries::workers;

use crate::dispatch_cmd::build_dispatcher;
use crate::runtime_stub::{LoggingRuntimeClient, TracingEventPublisher, TracingNotifier};

fn build_listener(pool: PgPool, admission: AdmissionConfig) -> Listener {
    let dispatcher = Arc::new(build_dispatcher(pool.clone(), admission));
    Listener::new(
        pool,
        ProjectionCache::new(),
        Arc::new(TracingEventPublisher),
        Arc::new(TracingNotifier),
        dispatcher,
    )
}

/// Poll every non-offline worker once and feed whatever events it returns
/// through the listener. Polling an idle worker is harmless, so this does
/// not bother filtering to workers with runs actually in flight.
pub async fn run_tick(pool: &PgPool, admission: AdmissionConfig) -> anyhow::Result<()> {
    let listener = build_listener(pool.clone(), admission);
    let runtime = LoggingRuntimeClient;
    let all_workers = workers::list_workers(pool).await?;

    let mut handled = 0usize;
    for worker in all_workers.iter().filter(|w| w.status != WorkerStatus::Offline) {
        let events = runtime.poll_events(worker.id).await?;
        for message in &events {
            listener.handle_message(message).await?;
            handled += 1;
        }
    }

    println!("Polled {} worker(s), handled {handled} event(s).", all_workers.len());
    Ok(())
}

/// Poll on a fixed interval until cancelled (Ctrl+C).
pub async fn run_loop(pool: &PgPool, admission: AdmissionConfig, interval_secs: u64) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_tick(pool, admission.clone()).await {
                    tracing::error!(error = %e, "listen tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down listen loop.");
                return Ok(());
            }
        }
    }
}
