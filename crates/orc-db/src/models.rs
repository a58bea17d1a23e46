use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    PendingApproval,
    Succeeded,
    Failed,
    Cancelled,
    Obsolete,
}

impl RunState {
    /// Terminal states no longer accept transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Obsolete
        )
    }

    /// States in which a run still occupies the task's queue head.
    pub const fn is_queue_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::PendingApproval)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::PendingApproval => "pending_approval",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Obsolete => "obsolete",
        };
        f.write_str(s)
    }
}

impl FromStr for RunState {
    type Err = RunStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "pending_approval" => Ok(Self::PendingApproval),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "obsolete" => Ok(Self::Obsolete),
            other => Err(RunStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RunState`] string.
#[derive(Debug, Clone)]
pub struct RunStateParseError(pub String);

impl fmt::Display for RunStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run state: {:?}", self.0)
    }
}

impl std::error::Error for RunStateParseError {}

// ---------------------------------------------------------------------------

/// Execution mode of a run: the default path or a review-only dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Default,
    Review,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Review => "review",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionMode {
    type Err = ExecutionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "review" => Ok(Self::Review),
            other => Err(ExecutionModeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionModeParseError(pub String);

impl fmt::Display for ExecutionModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution mode: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionModeParseError {}

// ---------------------------------------------------------------------------

/// How a task is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    OneShot,
    Cron,
    EventDriven,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OneShot => "one_shot",
            Self::Cron => "cron",
            Self::EventDriven => "event_driven",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_shot" => Ok(Self::OneShot),
            "cron" => Ok(Self::Cron),
            "event_driven" => Ok(Self::EventDriven),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// Status of a worker/runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Offline,
    Idle,
    Leased,
    Draining,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Leased => "leased",
            Self::Draining => "draining",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerStatus {
    type Err = WorkerStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Self::Offline),
            "idle" => Ok(Self::Idle),
            "leased" => Ok(Self::Leased),
            "draining" => Ok(Self::Draining),
            other => Err(WorkerStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStatusParseError(pub String);

impl fmt::Display for WorkerStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker status: {:?}", self.0)
    }
}

impl std::error::Error for WorkerStatusParseError {}

// ---------------------------------------------------------------------------

/// State of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    PendingApproval,
}

impl fmt::Display for WorkflowExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::PendingApproval => "pending_approval",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowExecutionState {
    type Err = WorkflowExecutionStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "pending_approval" => Ok(Self::PendingApproval),
            other => Err(WorkflowExecutionStateParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowExecutionStateParseError(pub String);

impl fmt::Display for WorkflowExecutionStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow execution state: {:?}", self.0)
    }
}

impl std::error::Error for WorkflowExecutionStateParseError {}

// ---------------------------------------------------------------------------

/// State of a single workflow node result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
    DeadLettered,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed_out",
            Self::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeState {
    type Err = NodeStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "timed_out" => Ok(Self::TimedOut),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(NodeStateParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeStateParseError(pub String);

impl fmt::Display for NodeStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node state: {:?}", self.0)
    }
}

impl std::error::Error for NodeStateParseError {}

// ---------------------------------------------------------------------------

/// Kind of alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertRuleType {
    MissingHeartbeat,
    FailureRateSpike,
    QueueBacklog,
    RepeatedPrFailures,
    RouteLeakDetection,
}

impl fmt::Display for AlertRuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingHeartbeat => "missing_heartbeat",
            Self::FailureRateSpike => "failure_rate_spike",
            Self::QueueBacklog => "queue_backlog",
            Self::RepeatedPrFailures => "repeated_pr_failures",
            Self::RouteLeakDetection => "route_leak_detection",
        };
        f.write_str(s)
    }
}

impl FromStr for AlertRuleType {
    type Err = AlertRuleTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing_heartbeat" => Ok(Self::MissingHeartbeat),
            "failure_rate_spike" => Ok(Self::FailureRateSpike),
            "queue_backlog" => Ok(Self::QueueBacklog),
            "repeated_pr_failures" => Ok(Self::RepeatedPrFailures),
            "route_leak_detection" => Ok(Self::RouteLeakDetection),
            other => Err(AlertRuleTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertRuleTypeParseError(pub String);

impl fmt::Display for AlertRuleTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid alert rule type: {:?}", self.0)
    }
}

impl std::error::Error for AlertRuleTypeParseError {}

// ---------------------------------------------------------------------------

/// The narrow set of failure classifications surfaced on run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    EnvelopeValidation,
    Timeout,
    OrphanRecovery,
    StaleRun,
    ZombieRun,
    OverdueRun,
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EnvelopeValidation => "envelope_validation",
            Self::Timeout => "timeout",
            Self::OrphanRecovery => "orphan_recovery",
            Self::StaleRun => "stale_run",
            Self::ZombieRun => "zombie_run",
            Self::OverdueRun => "overdue_run",
        };
        f.write_str(s)
    }
}

impl FromStr for FailureClassification {
    type Err = FailureClassificationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope_validation" => Ok(Self::EnvelopeValidation),
            "timeout" => Ok(Self::Timeout),
            "orphan_recovery" => Ok(Self::OrphanRecovery),
            "stale_run" => Ok(Self::StaleRun),
            "zombie_run" => Ok(Self::ZombieRun),
            "overdue_run" => Ok(Self::OverdueRun),
            other => Err(FailureClassificationParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureClassificationParseError(pub String);

impl fmt::Display for FailureClassificationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid failure classification: {:?}", self.0)
    }
}

impl std::error::Error for FailureClassificationParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// An immutable top-level container for repositories.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A git repository under management.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub git_url: String,
    pub default_branch: String,
    pub instruction_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A task definition: what to run, how often, and under what policy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub harness: String,
    pub prompt: String,
    pub command: Option<String>,
    pub concurrency_limit: i32,
    pub require_approval: bool,
    pub execution_timeout_seconds: i32,
    pub retry_max_attempts: i32,
    pub retry_backoff_base_seconds: i32,
    pub retry_backoff_mult: f64,
    pub artifact_patterns: Vec<String>,
    pub instruction_files: Vec<String>,
    pub kind: TaskKind,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub auto_create_pr: bool,
    pub last_git_sync_at: Option<DateTime<Utc>>,
    pub last_git_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One attempt of a task on a runtime.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: Uuid,
    pub task_id: Uuid,
    pub repository_id: Uuid,
    pub state: RunState,
    pub attempt: i32,
    pub worker_id: Option<Uuid>,
    pub container_id: Option<String>,
    pub execution_mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pr_url: Option<String>,
    pub output_json: Option<serde_json::Value>,
    pub summary: Option<String>,
    pub failure_classification: Option<FailureClassification>,
    pub failure_reason: Option<String>,
}

/// A containerised task-runtime, as tracked by the lease coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Worker {
    pub id: Uuid,
    pub endpoint: String,
    pub status: WorkerStatus,
    pub capabilities: Vec<String>,
    pub max_slots: i32,
    pub active_slots: i32,
    pub last_heartbeat: DateTime<Utc>,
}

/// An encrypted per-repository credential.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderSecret {
    pub repository_id: Uuid,
    pub provider: String,
    pub encrypted_value: String,
    pub created_at: DateTime<Utc>,
}

/// A sequenced structured event emitted by a harness during a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunStructuredEvent {
    pub id: i64,
    pub run_id: Uuid,
    pub sequence: i64,
    pub category: String,
    pub event_type: String,
    pub payload_json: serde_json::Value,
    pub schema_version: String,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The latest accumulated diff for a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunDiffSnapshot {
    pub run_id: Uuid,
    pub sequence: i64,
    pub diff_stat: String,
    pub diff_patch: String,
    pub updated_at: DateTime<Utc>,
}

/// A workflow graph definition (v2).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub nodes_json: serde_json::Value,
    pub edges_json: serde_json::Value,
    pub trigger_type: String,
    pub trigger_cron: Option<String>,
    pub max_concurrent_nodes: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A single run of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub state: WorkflowExecutionState,
    pub node_results_json: serde_json::Value,
    pub context_json: serde_json::Value,
    pub pending_approval_node_id: Option<String>,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A captured snapshot enabling a failed workflow node to be replayed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub failed_node_id: String,
    pub attempt: i32,
    pub input_context_snapshot: serde_json::Value,
    pub replayed: bool,
    pub replayed_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An alert rule evaluated on each tick by the alert checker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRule {
    pub id: Uuid,
    pub rule_type: AlertRuleType,
    pub threshold: f64,
    pub window_minutes: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A named, TTL-bounded distributed lease row backing the C9 coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaintenanceLease {
    pub name: String,
    pub fencing_token: i64,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_display_roundtrip() {
        let variants = [
            RunState::Queued,
            RunState::Running,
            RunState::PendingApproval,
            RunState::Succeeded,
            RunState::Failed,
            RunState::Cancelled,
            RunState::Obsolete,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: RunState = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn run_state_invalid() {
        assert!("bogus".parse::<RunState>().is_err());
    }

    #[test]
    fn run_state_terminal_classification() {
        assert!(!RunState::Queued.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::PendingApproval.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::Obsolete.is_terminal());
    }

    #[test]
    fn run_state_queue_active_classification() {
        assert!(RunState::Queued.is_queue_active());
        assert!(RunState::Running.is_queue_active());
        assert!(RunState::PendingApproval.is_queue_active());
        assert!(!RunState::Succeeded.is_queue_active());
    }

    #[test]
    fn execution_mode_display_roundtrip() {
        for v in [ExecutionMode::Default, ExecutionMode::Review] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn task_kind_display_roundtrip() {
        for v in [TaskKind::OneShot, TaskKind::Cron, TaskKind::EventDriven] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn worker_status_display_roundtrip() {
        for v in [
            WorkerStatus::Offline,
            WorkerStatus::Idle,
            WorkerStatus::Leased,
            WorkerStatus::Draining,
        ] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn workflow_execution_state_display_roundtrip() {
        for v in [
            WorkflowExecutionState::Running,
            WorkflowExecutionState::Succeeded,
            WorkflowExecutionState::Failed,
            WorkflowExecutionState::Cancelled,
            WorkflowExecutionState::PendingApproval,
        ] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn node_state_display_roundtrip() {
        for v in [
            NodeState::Pending,
            NodeState::Running,
            NodeState::Succeeded,
            NodeState::Failed,
            NodeState::Skipped,
            NodeState::TimedOut,
            NodeState::DeadLettered,
        ] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn alert_rule_type_display_roundtrip() {
        for v in [
            AlertRuleType::MissingHeartbeat,
            AlertRuleType::FailureRateSpike,
            AlertRuleType::QueueBacklog,
            AlertRuleType::RepeatedPrFailures,
            AlertRuleType::RouteLeakDetection,
        ] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }

    #[test]
    fn failure_classification_display_roundtrip() {
        for v in [
            FailureClassification::EnvelopeValidation,
            FailureClassification::Timeout,
            FailureClassification::OrphanRecovery,
            FailureClassification::StaleRun,
            FailureClassification::ZombieRun,
            FailureClassification::OverdueRun,
        ] {
            let s = v.to_string();
            assert_eq!(v, s.parse().unwrap());
        }
    }
}
