//! Event stream listener (C3): consumes per-run messages pushed by a
//! runtime, mutates run state, and triggers the follow-ups each message
//! type implies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::models::FailureClassification;
use orc_db::queries::{
    diff_snapshots, runs as run_db, structured_events, tasks as task_db, workers,
};

use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::lease::LeaseCoordinator;
use crate::projector::ProjectionCache;
use crate::traits::{EventPublisher, JobEventMessage, Notifier};

/// Events are hydrated from the store in full; a run's structured event
/// history is bounded in practice (a single run's lifetime), so there is no
/// need for a paging cursor here.
const MAX_HYDRATED_EVENTS: i64 = 100_000;

/// The harness's self-reported outcome, carried as JSON under
/// `metadata["payload"]` on a `completed` message.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessResultEnvelope {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub pr_url: Option<String>,
}

/// Outcome of handling one inbound message, surfaced for tests/logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    LoggedChunk,
    StructuredEventApplied,
    RunSucceeded,
    RunFailed,
    RunObsolete,
}

pub struct Listener {
    pool: PgPool,
    lease: LeaseCoordinator,
    projector: Arc<ProjectionCache>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<Dispatcher>,
}

impl Listener {
    pub fn new(
        pool: PgPool,
        projector: Arc<ProjectionCache>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let lease = LeaseCoordinator::new(pool.clone());
        Self {
            pool,
            lease,
            projector,
            publisher,
            notifier,
            dispatcher,
        }
    }

    /// Apply one message from a runtime's event stream.
    pub async fn handle_message(&self, message: &JobEventMessage) -> anyhow::Result<HandleOutcome> {
        match message.event_type.as_str() {
            "completed" => self.handle_completed(message).await,
            _ => {
                let is_structured = message.sequence.map(|s| s > 0).unwrap_or(false)
                    && message.category.as_deref().map(|c| !c.is_empty()).unwrap_or(false)
                    || message
                        .schema_version
                        .as_deref()
                        .map(|s| !s.is_empty())
                        .unwrap_or(false);

                if is_structured {
                    self.handle_structured_event(message).await
                } else {
                    tracing::info!(
                        run_id = %message.run_id,
                        event_type = %message.event_type,
                        summary = ?message.summary,
                        "log chunk received"
                    );
                    Ok(HandleOutcome::LoggedChunk)
                }
            }
        }
    }

    async fn handle_structured_event(
        &self,
        message: &JobEventMessage,
    ) -> anyhow::Result<HandleOutcome> {
        let sequence = message.sequence.unwrap_or(0);
        let category = message.category.clone().unwrap_or_default();
        let payload = message.payload_json.clone().unwrap_or(serde_json::json!({}));

        let new_event = structured_events::NewStructuredEvent {
            run_id: message.run_id,
            sequence,
            category: category.clone(),
            event_type: message.event_type.clone(),
            payload_json: payload.clone(),
            schema_version: message.schema_version.clone().unwrap_or_default(),
            summary: message.summary.clone(),
            error: None,
        };
        let event = structured_events::append_structured_event(&self.pool, &new_event).await?;

        let run_id = message.run_id;
        // Hydrate from the store on first touch: if this run has no cached
        // snapshot yet, load its full persisted history so the fold starts
        // from the correct baseline rather than from this one event.
        let already_cached = self.projector.snapshot(run_id).await.is_some();
        let prior_events = if already_cached {
            Vec::new()
        } else {
            structured_events::list_structured_events(&self.pool, run_id, MAX_HYDRATED_EVENTS)
                .await
                .unwrap_or_default()
        };
        self.projector.apply(run_id, || prior_events, &event).await;
        self.publisher
            .publish_structured_delta(run_id, &payload)
            .await;

        if category == "diff.updated" {
            let diff_stat = payload
                .get("diff_stat")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let diff_patch = payload
                .get("diff_patch")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            diff_snapshots::upsert_diff_snapshot(&self.pool, run_id, sequence, diff_stat, diff_patch)
                .await?;
        }

        Ok(HandleOutcome::StructuredEventApplied)
    }

    async fn handle_completed(&self, message: &JobEventMessage) -> anyhow::Result<HandleOutcome> {
        let run_id = message.run_id;
        let Some(run) = run_db::get_run(&self.pool, run_id).await? else {
            tracing::warn!(run_id = %run_id, "completed message for unknown run, ignoring");
            return Ok(HandleOutcome::LoggedChunk);
        };

        let disposition = message.metadata.get("runDisposition").map(String::as_str);
        if disposition == Some("obsolete") {
            run_db::mark_run_obsolete(&self.pool, run_id).await?;
            if let Some(updated) = run_db::get_run(&self.pool, run_id).await? {
                self.publisher.publish_run_status(&updated).await;
            }
            if let Some(worker_id) = run.worker_id {
                self.lease.release_on_run_terminal(worker_id).await?;
            }
            self.try_dispatch_next(run.task_id).await;
            return Ok(HandleOutcome::RunObsolete);
        }

        let raw_payload = message.metadata.get("payload");
        let envelope: Result<HarnessResultEnvelope, CoreError> = match raw_payload {
            None => Err(CoreError::EnvelopeValidation(
                "Worker completed without payload".to_string(),
            )),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|_| CoreError::EnvelopeValidation("Invalid payload".to_string())),
        };

        let outcome = match envelope {
            Ok(env) if env.status.eq_ignore_ascii_case("succeeded") => {
                run_db::mark_run_completed(
                    &self.pool,
                    run_id,
                    true,
                    None,
                    env.output.as_ref(),
                    None,
                    env.pr_url.as_deref(),
                )
                .await?;
                HandleOutcome::RunSucceeded
            }
            Ok(env) => {
                let reason = env.error.clone().unwrap_or_else(|| "run failed".to_string());
                let classification = CoreError::classify_error_string(&reason);
                run_db::mark_run_completed(
                    &self.pool,
                    run_id,
                    false,
                    Some(&reason),
                    env.output.as_ref(),
                    classification,
                    None,
                )
                .await?;
                self.record_finding(run_id, &reason, classification).await;
                HandleOutcome::RunFailed
            }
            Err(e) => {
                let classification = e.failure_classification();
                let reason = e.to_string();
                run_db::mark_run_completed(
                    &self.pool,
                    run_id,
                    false,
                    Some(&reason),
                    None,
                    classification,
                    None,
                )
                .await?;
                self.record_finding(run_id, &reason, classification).await;
                HandleOutcome::RunFailed
            }
        };

        let git_workflow_failed = message
            .metadata
            .get("gitWorkflow")
            .map(|v| v == "failed")
            .unwrap_or(false);
        let git_failure = if git_workflow_failed {
            message.metadata.get("gitFailure").map(String::as_str)
        } else {
            Some("")
        };
        task_db::update_task_git_metadata(&self.pool, run.task_id, Some(chrono::Utc::now()), git_failure)
            .await?;

        if let Some(updated) = run_db::get_run(&self.pool, run_id).await? {
            self.publisher.publish_run_status(&updated).await;
        }
        if let Some(worker_id) = run.worker_id {
            self.lease.release_on_run_terminal(worker_id).await?;
        }

        self.try_dispatch_next(run.task_id).await;

        Ok(outcome)
    }

    async fn record_finding(
        &self,
        run_id: Uuid,
        reason: &str,
        classification: Option<FailureClassification>,
    ) {
        tracing::warn!(
            run_id = %run_id,
            classification = ?classification,
            reason = %reason,
            "run failed, finding recorded"
        );
        self.notifier
            .notify("Run failed", &format!("run {run_id}: {reason}"))
            .await;
    }

    /// A run just freed its task's queue head; dispatch whatever is now at
    /// the front rather than waiting for the next dispatch tick.
    async fn try_dispatch_next(&self, task_id: Uuid) {
        let Ok(Some(head)) = run_db::get_queue_head(&self.pool, task_id).await else {
            return;
        };
        match self.dispatcher.dispatch(head.id, &HashMap::new()).await {
            Ok(outcome) => {
                tracing::debug!(run_id = %head.id, task_id = %task_id, outcome = ?outcome, "queue head dispatch attempted")
            }
            Err(e) => {
                tracing::warn!(run_id = %head.id, task_id = %task_id, error = %e, "failed to dispatch queue head")
            }
        }
    }

    /// Mark a runtime offline and fail its in-flight runs, used when the
    /// stream for that runtime closes unrecoverably.
    pub async fn handle_worker_status(
        &self,
        worker_id: Uuid,
        active_slots: i32,
        max_slots: i32,
    ) -> anyhow::Result<()> {
        workers::record_worker_status(&self.pool, worker_id, active_slots, max_slots).await?;
        Ok(())
    }
}

/// Exponential backoff schedule for stream reconnects: 1s, 2s, 4s, ...
/// capped at 30s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let seconds = 1u64.checked_shl(attempt).unwrap_or(u64::MAX).min(30);
    Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_caps_at_thirty_seconds() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(2), Duration::from_secs(4));
        assert_eq!(reconnect_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn harness_result_envelope_parses_minimal_success() {
        let raw = r#"{"status":"Succeeded"}"#;
        let env: HarnessResultEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.status.eq_ignore_ascii_case("succeeded"));
        assert!(env.error.is_none());
    }

    #[test]
    fn harness_result_envelope_parses_failure_with_reason() {
        let raw = r#"{"status":"failed","error":"boom"}"#;
        let env: HarnessResultEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.error.as_deref(), Some("boom"));
    }
}
