//! Composition-root stand-ins for the collaborators this codebase treats as
//! external: the runtime RPC client, the secret crypto service, the event
//! bus, and operator notifications. A real deployment wires its own runtime
//! fleet, KMS, and pub/sub; the CLI's job is to drive the control plane, not
//! to reimplement those services, so it wires the simplest thing that keeps
//! the loop honest: log what would have happened.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use orc_core::traits::{
    ContainerReaper, DispatchRequest, DispatchRpcResult, EventPublisher, JobEventMessage, Notifier,
    RuntimeClient, SecretCrypto,
};
use orc_db::models::Run;

/// Dispatches by logging the request and reporting immediate success. Stands
/// in for the real runtime RPC client, which is an external collaborator.
pub struct LoggingRuntimeClient;

#[async_trait]
impl RuntimeClient for LoggingRuntimeClient {
    async fn dispatch_job(
        &self,
        worker_id: Uuid,
        request: &DispatchRequest,
    ) -> Result<DispatchRpcResult> {
        tracing::info!(
            worker_id = %worker_id,
            run_id = %request.run_id,
            harness = %request.harness,
            "dispatching run (no runtime fleet configured)"
        );
        Ok(DispatchRpcResult {
            success: true,
            error_message: None,
            worker_id,
            container_id: format!("stub-{}", request.run_id),
        })
    }

    async fn cancel_job(&self, worker_id: Uuid, run_id: Uuid) -> Result<()> {
        tracing::info!(worker_id = %worker_id, run_id = %run_id, "cancel job (no-op)");
        Ok(())
    }

    async fn kill_container(
        &self,
        worker_id: Uuid,
        run_id: Uuid,
        reason: &str,
        force: bool,
    ) -> Result<()> {
        tracing::info!(worker_id = %worker_id, run_id = %run_id, reason, force, "kill container (no-op)");
        Ok(())
    }

    async fn poll_events(&self, worker_id: Uuid) -> Result<Vec<JobEventMessage>> {
        tracing::debug!(worker_id = %worker_id, "poll events (no runtime fleet configured)");
        Ok(Vec::new())
    }
}

#[async_trait]
impl ContainerReaper for LoggingRuntimeClient {
    async fn kill(&self, worker_id: Uuid, container_id: &str, reason: &str) -> Result<()> {
        tracing::info!(worker_id = %worker_id, container_id, reason, "reap container (no-op)");
        Ok(())
    }
}

/// Treats secret ciphertext as already-plaintext. Stands in for the real
/// KMS-backed decryptor, which is an external collaborator.
pub struct IdentitySecretCrypto;

#[async_trait]
impl SecretCrypto for IdentitySecretCrypto {
    async fn decrypt(&self, encrypted_value: &str) -> Result<String> {
        Ok(encrypted_value.to_string())
    }
}

/// Publishes by logging at `debug`. Stands in for the HTTP/UI layer's event
/// bus, which is an external collaborator.
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish_run_status(&self, run: &Run) {
        tracing::debug!(run_id = %run.id, state = %run.state, "run status");
    }

    async fn publish_route_available(&self, run_id: Uuid, endpoint: &str) {
        tracing::debug!(run_id = %run_id, endpoint, "route available");
    }

    async fn publish_structured_delta(&self, run_id: Uuid, delta: &serde_json::Value) {
        tracing::debug!(run_id = %run_id, delta = %delta, "structured delta");
    }
}

/// Surfaces alert firings as `warn` log lines.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, body: &str) {
        tracing::warn!(title, body, "notification");
    }
}
