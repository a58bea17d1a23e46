//! Capability-set interfaces wired once at process composition (see
//! `orc-cli`'s `main`), never discovered at runtime.
//!
//! Each trait is object-safe so it can be stored as `Arc<dyn Trait + Send +
//! Sync>` and shared across the component tasks that need it.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use orc_db::models::{FailureClassification, Run};

/// A request to dispatch one run to a runtime, assembled by the dispatcher
/// (C1) and handed to the `RuntimeClient`.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub harness: String,
    pub prompt: String,
    pub command: Option<String>,
    pub env: HashMap<String, String>,
    pub retry_count: i32,
    pub execution_timeout_seconds: i32,
}

/// Outcome of a `DispatchJob` RPC call.
#[derive(Debug, Clone)]
pub struct DispatchRpcResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub worker_id: Uuid,
    pub container_id: String,
}

/// A message delivered over a runtime's event stream, per the wire taxonomy
/// consumed by the event stream listener (C3).
#[derive(Debug, Clone)]
pub struct JobEventMessage {
    pub run_id: Uuid,
    pub event_type: String,
    pub summary: Option<String>,
    pub sequence: Option<i64>,
    pub category: Option<String>,
    pub payload_json: Option<serde_json::Value>,
    pub schema_version: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// The RPC surface a runtime/worker exposes to the control plane.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn dispatch_job(&self, worker_id: Uuid, request: &DispatchRequest) -> Result<DispatchRpcResult>;
    async fn cancel_job(&self, worker_id: Uuid, run_id: Uuid) -> Result<()>;
    async fn kill_container(&self, worker_id: Uuid, run_id: Uuid, reason: &str, force: bool) -> Result<()>;

    /// Drain every `JobEventMessage` a worker has queued since the last
    /// poll. The event stream listener (C3) calls this once per worker per
    /// tick; a real runtime client backs it with its own streaming RPC and
    /// buffers messages between polls, the same way `dispatch_job` hides an
    /// RPC call behind a plain async method.
    async fn poll_events(&self, worker_id: Uuid) -> Result<Vec<JobEventMessage>>;
}

/// Notifications published for external subscribers (HTTP layer, UI). Also
/// used internally to signal a run's terminal state to waiting workflow
/// executions.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_run_status(&self, run: &Run);
    async fn publish_route_available(&self, run_id: Uuid, endpoint: &str);
    async fn publish_structured_delta(&self, run_id: Uuid, delta: &serde_json::Value);
}

/// Decrypts a provider secret's ciphertext. Concrete implementations wrap
/// whatever KMS/crypto service the deployment provides; the core only ever
/// sees ciphertext at rest.
#[async_trait]
pub trait SecretCrypto: Send + Sync {
    async fn decrypt(&self, encrypted_value: &str) -> Result<String>;
}

/// Forcibly terminates a runtime's container, used by the recovery service
/// for zombie/overdue runs when `force_kill_on_timeout` is enabled.
#[async_trait]
pub trait ContainerReaper: Send + Sync {
    async fn kill(&self, worker_id: Uuid, container_id: &str, reason: &str) -> Result<()>;
}

/// Side channel for operator-facing notifications (alert firings).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

/// A failure observed by C3 or C6, recorded as a finding via the
/// out-of-scope findings collaborator.
#[derive(Debug, Clone)]
pub struct Finding {
    pub run_id: Uuid,
    pub reason: String,
    pub classification: Option<FailureClassification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRuntimeClient;

    #[async_trait]
    impl RuntimeClient for NoopRuntimeClient {
        async fn dispatch_job(
            &self,
            worker_id: Uuid,
            _request: &DispatchRequest,
        ) -> Result<DispatchRpcResult> {
            Ok(DispatchRpcResult {
                success: true,
                error_message: None,
                worker_id,
                container_id: "noop".to_string(),
            })
        }

        async fn cancel_job(&self, _worker_id: Uuid, _run_id: Uuid) -> Result<()> {
            Ok(())
        }

        async fn kill_container(
            &self,
            _worker_id: Uuid,
            _run_id: Uuid,
            _reason: &str,
            _force: bool,
        ) -> Result<()> {
            Ok(())
        }

        async fn poll_events(&self, _worker_id: Uuid) -> Result<Vec<JobEventMessage>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn runtime_client_is_object_safe() {
        let client: Box<dyn RuntimeClient> = Box::new(NoopRuntimeClient);
        assert!(std::mem::size_of_val(&client) > 0);
    }

    #[tokio::test]
    async fn noop_runtime_client_dispatch_succeeds() {
        let client: Box<dyn RuntimeClient> = Box::new(NoopRuntimeClient);
        let request = DispatchRequest {
            run_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            harness: "codex".to_string(),
            prompt: "do the thing".to_string(),
            command: None,
            env: HashMap::new(),
            retry_count: 0,
            execution_timeout_seconds: 60,
        };
        let worker_id = Uuid::new_v4();
        let result = client.dispatch_job(worker_id, &request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.worker_id, worker_id);
    }
}
