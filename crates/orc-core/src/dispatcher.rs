//! Run dispatcher (C1): admits, enriches, and hands off a queued run to a
//! leased runtime.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::models::{Run, RunState};
use orc_db::queries::{projects, repositories, runs as run_db, secrets, tasks as task_db};

use crate::envmap::{apply_secret, build_env};
use crate::lease::{LeaseCoordinator, LeaseOutcome};
use crate::prompt::{apply_substitutions, assemble_prompt};
use crate::traits::{DispatchRequest, EventPublisher, RuntimeClient, SecretCrypto};
use crate::config::AdmissionConfig;

/// Outcome of a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    LeftQueued,
    MarkedPendingApproval,
    Failed { reason: String },
}

pub struct Dispatcher {
    pool: PgPool,
    lease: LeaseCoordinator,
    runtime: Arc<dyn RuntimeClient>,
    secret_crypto: Arc<dyn SecretCrypto>,
    publisher: Arc<dyn EventPublisher>,
    admission: AdmissionConfig,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        runtime: Arc<dyn RuntimeClient>,
        secret_crypto: Arc<dyn SecretCrypto>,
        publisher: Arc<dyn EventPublisher>,
        admission: AdmissionConfig,
    ) -> Self {
        let lease = LeaseCoordinator::new(pool.clone());
        Self {
            pool,
            lease,
            runtime,
            secret_crypto,
            publisher,
            admission,
        }
    }

    /// Run the full admission pipeline for one queued run. `substitutions`
    /// carries `{{placeholder}}` -> value replacements for the assembled
    /// prompt, populated by a workflow node's `input_mappings`; a run
    /// dispatched outside a workflow passes an empty map.
    pub async fn dispatch(
        &self,
        run_id: Uuid,
        substitutions: &HashMap<String, String>,
    ) -> Result<DispatchOutcome> {
        let run = run_db::get_run(&self.pool, run_id)
            .await?
            .with_context(|| format!("run {run_id} not found"))?;
        let task = task_db::get_task(&self.pool, run.task_id)
            .await?
            .with_context(|| format!("task {} not found", run.task_id))?;
        let repository = repositories::get_repository(&self.pool, run.repository_id)
            .await?
            .with_context(|| format!("repository {} not found", run.repository_id))?;

        // 1. Approval gate.
        if task.require_approval && run.state == RunState::Queued {
            let rows = run_db::mark_run_pending_approval(&self.pool, run.id).await?;
            if rows > 0 {
                if let Some(updated) = run_db::get_run(&self.pool, run.id).await? {
                    self.publisher.publish_run_status(&updated).await;
                }
                return Ok(DispatchOutcome::MarkedPendingApproval);
            }
        }

        // 2. Queue-head rule.
        let head = run_db::get_queue_head(&self.pool, task.id).await?;
        match head {
            Some(head_run) if head_run.id == run.id => {}
            _ => return Ok(DispatchOutcome::LeftQueued),
        }

        // 3. Concurrency gates.
        let global_active = run_db::count_active_runs(&self.pool).await?;
        if global_active >= self.admission.max_global_concurrent_runs {
            return Ok(DispatchOutcome::LeftQueued);
        }

        if self.admission.enforce_project_limit {
            let project_active =
                projects::count_active_runs_for_project(&self.pool, repository.project_id).await?;
            if project_active >= self.admission.per_project_concurrency_limit {
                return Ok(DispatchOutcome::LeftQueued);
            }
        }

        let repo_active =
            repositories::count_active_runs_for_repo(&self.pool, repository.id).await?;
        if repo_active >= self.admission.per_repo_concurrency_limit {
            return Ok(DispatchOutcome::LeftQueued);
        }

        if task.concurrency_limit > 0 {
            let task_active = task_db::count_active_runs_for_task(&self.pool, task.id).await?;
            if task_active >= task.concurrency_limit as i64 {
                return Ok(DispatchOutcome::LeftQueued);
            }
        }

        // 4. Acquire a runtime lease.
        let lease_outcome = self.lease.acquire_for_dispatch(&task.harness).await?;
        let (worker_id, _endpoint) = match lease_outcome {
            LeaseOutcome::Acquired { worker_id, runtime_endpoint } => (worker_id, runtime_endpoint),
            LeaseOutcome::None => return Ok(DispatchOutcome::LeftQueued),
        };

        // 5. Assemble the dispatch request.
        let prompt = apply_substitutions(&assemble_prompt(&repository, &task), substitutions);
        let zai_secret = if task.harness == "zai" {
            self.resolve_zai_secret(&repository.id).await
        } else {
            None
        };
        let mut env = build_env(
            &repository,
            &task,
            run.execution_mode,
            &run.id,
            zai_secret.as_deref(),
        );
        self.apply_repo_secrets(&mut env, &repository.id).await;

        let request = DispatchRequest {
            run_id: run.id,
            task_id: task.id,
            harness: task.harness.clone(),
            prompt,
            command: task.command.clone(),
            env,
            retry_count: run.attempt - 1,
            execution_timeout_seconds: task.execution_timeout_seconds,
        };

        task_db::update_task_git_metadata(&self.pool, task.id, None, None).await?;

        // 6. Call the runtime's Dispatch RPC.
        let rpc_result = self.runtime.dispatch_job(worker_id, &request).await;

        match rpc_result {
            Ok(result) if result.success => {
                run_db::mark_run_started(&self.pool, run.id, worker_id, &result.container_id)
                    .await?;
                self.lease.record_dispatch_activity(worker_id).await?;

                let updated = run_db::get_run(&self.pool, run.id).await?.unwrap_or(run);
                self.publisher.publish_run_status(&updated).await;
                self.publisher
                    .publish_route_available(updated.id, &result.container_id)
                    .await;
                Ok(DispatchOutcome::Dispatched)
            }
            Ok(result) => {
                let reason = format!(
                    "Dispatch failed: {}",
                    result.error_message.unwrap_or_else(|| "unknown error".to_string())
                );
                self.fail_and_release(&run, worker_id, &reason).await?;
                Ok(DispatchOutcome::Failed { reason })
            }
            Err(e) => {
                let reason = format!("Dispatch failed: {e}");
                self.fail_and_release(&run, worker_id, &reason).await?;
                Ok(DispatchOutcome::Failed { reason })
            }
        }
    }

    async fn fail_and_release(&self, run: &Run, worker_id: Uuid, reason: &str) -> Result<()> {
        run_db::mark_run_completed(&self.pool, run.id, false, Some(reason), None, None, None)
            .await?;
        self.lease.release_on_run_terminal(worker_id).await?;
        Ok(())
    }

    /// Decrypt and inject every provider secret registered directly on the
    /// repository. Decrypt errors on an individual secret are warned and the
    /// secret omitted, not fatal to the dispatch attempt.
    async fn apply_repo_secrets(
        &self,
        env: &mut std::collections::HashMap<String, String>,
        repository_id: &Uuid,
    ) {
        let Ok(repo_secrets) = secrets::list_provider_secrets(&self.pool, *repository_id).await
        else {
            return;
        };

        for secret in &repo_secrets {
            match self.secret_crypto.decrypt(&secret.encrypted_value).await {
                Ok(decrypted) => apply_secret(env, secret, &decrypted),
                Err(e) => {
                    tracing::warn!(
                        repository_id = %repository_id,
                        provider = %secret.provider,
                        error = %e,
                        "failed to decrypt provider secret, omitting"
                    );
                }
            }
        }
    }

    /// Resolve the decrypted `zai` secret for a repository, falling back to
    /// the globally configured `llmtornado` secret when the repository has
    /// none of its own.
    async fn resolve_zai_secret(&self, repository_id: &Uuid) -> Option<String> {
        let direct = secrets::get_provider_secret(&self.pool, Some(*repository_id), "zai")
            .await
            .ok()
            .flatten();
        let secret = match direct {
            Some(s) => s,
            None => secrets::get_provider_secret(&self.pool, None, "llmtornado")
                .await
                .ok()
                .flatten()?,
        };
        self.secret_crypto.decrypt(&secret.encrypted_value).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_outcome_failed_carries_reason() {
        let outcome = DispatchOutcome::Failed {
            reason: "Dispatch failed: boom".to_string(),
        };
        match outcome {
            DispatchOutcome::Failed { reason } => assert!(reason.contains("boom")),
            _ => panic!("expected Failed"),
        }
    }
}
