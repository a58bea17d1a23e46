//! DAG workflow executor (C5): schedules the nodes of a workflow graph,
//! handling approval gates, delays, retries, and dead-lettering.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use orc_db::models::{ExecutionMode, NodeState, RunState, Workflow, WorkflowExecutionState};
use orc_db::queries::{
    dead_letters, runs as run_db, tasks as task_db, workflow_executions as exec_db,
    workflows as workflow_db,
};

use crate::condition::{evaluate, EvalContext};
use crate::dispatcher::Dispatcher;
use crate::validator::{NodeKind, WorkflowEdge, WorkflowGraph, WorkflowNode};

fn node_state_is_terminal(state: NodeState) -> bool {
    matches!(
        state,
        NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
            | NodeState::TimedOut | NodeState::DeadLettered
    )
}

/// Persisted per-node execution state, the value type of an execution's
/// `node_results_json` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub state: NodeState,
    pub attempt: i32,
    pub run_id: Option<Uuid>,
    pub summary: Option<String>,
    pub pr_url: Option<String>,
    pub delay_until: Option<DateTime<Utc>>,
}

impl Default for NodeResult {
    fn default() -> Self {
        Self {
            state: NodeState::Pending,
            attempt: 0,
            run_id: None,
            summary: None,
            pr_url: None,
            delay_until: None,
        }
    }
}

/// Outcome of a single `tick` over one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced,
    NoChange,
    Succeeded,
    Failed,
}

fn parse_graph(workflow: &Workflow) -> Result<WorkflowGraph> {
    let nodes: Vec<WorkflowNode> = serde_json::from_value(workflow.nodes_json.clone())
        .context("failed to parse workflow nodes_json")?;
    let edges: Vec<WorkflowEdge> = serde_json::from_value(workflow.edges_json.clone())
        .context("failed to parse workflow edges_json")?;
    Ok(WorkflowGraph { nodes, edges })
}

pub struct WorkflowEngine {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
}

impl WorkflowEngine {
    pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    /// Start a new execution of `workflow_id` and run its first tick.
    pub async fn start(&self, workflow_id: Uuid, initial_context: HashMap<String, String>) -> Result<Uuid> {
        let workflow = workflow_db::get_workflow(&self.pool, workflow_id)
            .await?
            .with_context(|| format!("workflow {workflow_id} not found"))?;
        let graph = parse_graph(&workflow)?;
        graph
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid workflow graph: {e}"))?;

        let context_json = serde_json::to_value(&initial_context)?;
        let execution =
            exec_db::insert_workflow_execution(&self.pool, workflow_id, &context_json).await?;

        self.tick(execution.id).await?;
        Ok(execution.id)
    }

    /// Resume a `PendingApproval` execution and immediately re-tick it.
    pub async fn approve(&self, execution_id: Uuid, approved_by: &str) -> Result<()> {
        exec_db::resolve_approval(&self.pool, execution_id, approved_by).await?;
        self.tick(execution_id).await?;
        Ok(())
    }

    /// Reject a `PendingApproval` execution, cancelling it outright.
    pub async fn reject(&self, execution_id: Uuid) -> Result<()> {
        exec_db::mark_execution_finished(&self.pool, execution_id, WorkflowExecutionState::Cancelled)
            .await?;
        Ok(())
    }

    /// Replay a dead-lettered node into a fresh execution seeded with its
    /// captured context snapshot.
    pub async fn replay_from_dead_letter(&self, dead_letter_id: Uuid) -> Result<Uuid> {
        let pending = dead_letters::list_pending_dead_letters(&self.pool).await?;
        let dead_letter = pending
            .into_iter()
            .find(|d| d.id == dead_letter_id)
            .context("dead letter not found or already replayed")?;

        let context: HashMap<String, String> =
            serde_json::from_value(dead_letter.input_context_snapshot.clone()).unwrap_or_default();
        let new_execution_id = self.start(dead_letter.workflow_id, context).await?;
        dead_letters::mark_dead_letter_replayed(&self.pool, dead_letter_id, new_execution_id).await?;
        Ok(new_execution_id)
    }

    /// Advance `execution_id` by as much as a single synchronous pass over
    /// its graph allows: schedule newly-satisfied nodes, observe terminal
    /// runs/delays, and detect completion or deadlock.
    pub async fn tick(&self, execution_id: Uuid) -> Result<TickOutcome> {
        let execution = exec_db::get_workflow_execution(&self.pool, execution_id)
            .await?
            .with_context(|| format!("execution {execution_id} not found"))?;

        if execution.state != WorkflowExecutionState::Running {
            return Ok(TickOutcome::NoChange);
        }

        let workflow = workflow_db::get_workflow(&self.pool, execution.workflow_id)
            .await?
            .with_context(|| format!("workflow {} not found", execution.workflow_id))?;
        let graph = parse_graph(&workflow)?;

        let mut results: HashMap<String, NodeResult> =
            serde_json::from_value(execution.node_results_json.clone()).unwrap_or_default();
        let mut context: HashMap<String, String> =
            serde_json::from_value(execution.context_json.clone()).unwrap_or_default();

        let start_id = graph
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Start)
            .map(|n| n.id.clone())
            .context("graph has no start node")?;
        results
            .entry(start_id)
            .or_insert_with(|| NodeResult {
                state: NodeState::Succeeded,
                ..NodeResult::default()
            });

        let mut changed = false;
        let mut reached_end = false;

        let running_agents = results
            .iter()
            .filter(|(id, r)| {
                r.state == NodeState::Running
                    && matches!(graph.node(id).map(|n| &n.kind), Some(NodeKind::Agent { .. }))
            })
            .count();
        let mut agent_slots_free =
            (workflow.max_concurrent_nodes as usize).saturating_sub(running_agents);

        for node in &graph.nodes {
            match &node.kind {
                NodeKind::Start => {}
                NodeKind::Agent { agent_id } => {
                    let state = results.get(&node.id).map(|r| r.state).unwrap_or(NodeState::Pending);
                    if state == NodeState::Running {
                        let run_id = results.get(&node.id).and_then(|r| r.run_id);
                        if let Some(run_id) = run_id {
                            if let Some(run) = run_db::get_run(&self.pool, run_id).await? {
                                if run.state.is_terminal() {
                                    let dead_lettered = self
                                        .resolve_agent_terminal(
                                            &workflow,
                                            execution_id,
                                            node,
                                            &run,
                                            &mut results,
                                            &mut context,
                                        )
                                        .await?;
                                    changed = true;
                                    let _ = dead_lettered;
                                }
                            }
                        }
                        continue;
                    }
                    if state != NodeState::Pending {
                        continue;
                    }
                    if !self.incoming_satisfied(&graph, node, &results, &context) || agent_slots_free == 0
                    {
                        continue;
                    }
                    self.schedule_agent(agent_id, node, &mut results, &context).await?;
                    agent_slots_free -= 1;
                    changed = true;
                }
                NodeKind::Delay { seconds } => {
                    let entry = results.entry(node.id.clone()).or_default();
                    match entry.state {
                        NodeState::Pending => {
                            if !self.incoming_satisfied(&graph, node, &results, &context) {
                                continue;
                            }
                            let entry = results.entry(node.id.clone()).or_default();
                            entry.state = NodeState::Running;
                            entry.delay_until = Some(Utc::now() + chrono::Duration::seconds(*seconds));
                            changed = true;
                        }
                        NodeState::Running => {
                            if entry.delay_until.map(|d| Utc::now() >= d).unwrap_or(false) {
                                let entry = results.entry(node.id.clone()).or_default();
                                entry.state = NodeState::Succeeded;
                                changed = true;
                            }
                        }
                        _ => {}
                    }
                }
                NodeKind::Approval { .. } => {
                    let state = results.get(&node.id).map(|r| r.state).unwrap_or(NodeState::Pending);
                    if state == NodeState::Pending {
                        if !self.incoming_satisfied(&graph, node, &results, &context) {
                            continue;
                        }
                        exec_db::mark_pending_approval(&self.pool, execution_id, &node.id).await?;
                        results.entry(node.id.clone()).or_default().state = NodeState::Running;
                        changed = true;
                    } else if state == NodeState::Running && execution.pending_approval_node_id.is_none()
                    {
                        // Approval was resolved out-of-band (`approve`
                        // already flipped the execution back to `running`).
                        results.entry(node.id.clone()).or_default().state = NodeState::Succeeded;
                        changed = true;
                    }
                }
                NodeKind::End => {
                    let state = results.get(&node.id).map(|r| r.state).unwrap_or(NodeState::Pending);
                    if state == NodeState::Pending
                        && self.incoming_satisfied(&graph, node, &results, &context)
                    {
                        results.entry(node.id.clone()).or_default().state = NodeState::Succeeded;
                        changed = true;
                        reached_end = true;
                    }
                }
            }
        }

        if changed {
            let node_results_json = serde_json::to_value(&results)?;
            let context_json = serde_json::to_value(&context)?;
            exec_db::update_execution_progress(&self.pool, execution_id, &node_results_json, &context_json)
                .await?;
        }

        if reached_end {
            exec_db::mark_execution_finished(&self.pool, execution_id, WorkflowExecutionState::Succeeded)
                .await?;
            return Ok(TickOutcome::Succeeded);
        }

        if self.is_stuck(&graph, &results, &context) {
            exec_db::mark_execution_finished(&self.pool, execution_id, WorkflowExecutionState::Failed)
                .await?;
            return Ok(TickOutcome::Failed);
        }

        Ok(if changed { TickOutcome::Advanced } else { TickOutcome::NoChange })
    }

    async fn schedule_agent(
        &self,
        agent_id: &str,
        node: &WorkflowNode,
        results: &mut HashMap<String, NodeResult>,
        context: &HashMap<String, String>,
    ) -> Result<()> {
        let task_id: Uuid = agent_id
            .parse()
            .with_context(|| format!("agent_id {agent_id} is not a task id"))?;
        let task = task_db::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        let entry = results.entry(node.id.clone()).or_default();
        let run = run_db::insert_run(
            &self.pool,
            task_id,
            task.repository_id,
            entry.attempt + 1,
            ExecutionMode::Default,
        )
        .await?;

        entry.state = NodeState::Running;
        entry.attempt += 1;
        entry.run_id = Some(run.id);

        let substitutions = resolve_input_substitutions(node, context);

        let _ = self.dispatcher.dispatch(run.id, &substitutions).await;
        Ok(())
    }

    /// Apply a terminal run's outcome to its node, retrying, dead-lettering,
    /// or succeeding as appropriate. Returns `true` if the node was
    /// dead-lettered.
    async fn resolve_agent_terminal(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        node: &WorkflowNode,
        run: &orc_db::models::Run,
        results: &mut HashMap<String, NodeResult>,
        context: &mut HashMap<String, String>,
    ) -> Result<bool> {
        let mut dead_lettered = false;
        {
            let entry = results.entry(node.id.clone()).or_default();
            entry.summary = run.summary.clone();
            entry.pr_url = run.pr_url.clone();

            if run.state == RunState::Succeeded {
                entry.state = NodeState::Succeeded;
            } else if entry.attempt <= node.retry_max_attempts {
                entry.state = NodeState::Pending;
            } else {
                entry.state = NodeState::DeadLettered;
                dead_lettered = true;
            }
        }

        let entry_snapshot = results.get(&node.id).cloned().unwrap_or_default();
        for (ctx_key, source) in &node.output_mappings {
            let value = match source.as_str() {
                "run.summary" => run.summary.clone().unwrap_or_default(),
                "run.state" => run.state.to_string(),
                "run.prurl" => run.pr_url.clone().unwrap_or_default(),
                "node.state" => entry_snapshot.state.to_string(),
                "node.summary" => entry_snapshot.summary.clone().unwrap_or_default(),
                _ => continue,
            };
            context.insert(ctx_key.clone(), value);
        }

        if dead_lettered {
            let snapshot = serde_json::to_value(&*context)?;
            dead_letters::insert_dead_letter(
                &self.pool,
                execution_id,
                workflow.id,
                &node.id,
                entry_snapshot.attempt,
                &snapshot,
            )
            .await?;
        }

        Ok(dead_lettered)
    }

    fn incoming_satisfied(
        &self,
        graph: &WorkflowGraph,
        node: &WorkflowNode,
        results: &HashMap<String, NodeResult>,
        context: &HashMap<String, String>,
    ) -> bool {
        incoming_satisfied(graph, node, results, context)
    }

    fn is_stuck(
        &self,
        graph: &WorkflowGraph,
        results: &HashMap<String, NodeResult>,
        context: &HashMap<String, String>,
    ) -> bool {
        is_stuck(graph, results, context)
    }
}

fn incoming_satisfied(
    graph: &WorkflowGraph,
    node: &WorkflowNode,
    results: &HashMap<String, NodeResult>,
    context: &HashMap<String, String>,
) -> bool {
    graph
        .edges
        .iter()
        .filter(|e| e.to == node.id)
        .any(|edge| edge_activated(graph, edge, results, context))
}

/// An edge with an empty (or literal `true`) condition is the "default"
/// out-edge of its source node. There is no distinct recovery-edge concept:
/// a default edge only activates once its source node actually *succeeded*,
/// so a dead-lettered or otherwise-failed node fails the execution unless an
/// explicit condition (e.g. `node.state == DeadLettered`) names that
/// outcome.
fn is_default_condition(condition: &str) -> bool {
    let trimmed = condition.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("true")
}

fn edge_passes(edge: &WorkflowEdge, source_state: NodeState, eval_ctx: &EvalContext) -> bool {
    if is_default_condition(&edge.condition) {
        source_state == NodeState::Succeeded
    } else {
        evaluate(&edge.condition, eval_ctx)
    }
}

fn edge_activated(
    graph: &WorkflowGraph,
    edge: &WorkflowEdge,
    results: &HashMap<String, NodeResult>,
    context: &HashMap<String, String>,
) -> bool {
    let Some(source_result) = results.get(&edge.from) else {
        return false;
    };
    if !node_state_is_terminal(source_result.state) {
        return false;
    }

    let mut out_edges: Vec<&WorkflowEdge> =
        graph.edges.iter().filter(|e| e.from == edge.from).collect();
    out_edges.sort_by_key(|e| e.priority);

    let eval_ctx = EvalContext {
        run_state: None,
        node_state: source_result.state.to_string(),
        node_attempt: source_result.attempt as i64,
        context: context.clone(),
    };

    let winner = out_edges
        .iter()
        .find(|e| edge_passes(e, source_result.state, &eval_ctx));
    matches!(winner, Some(w) if w.to == edge.to && w.priority == edge.priority)
}

/// Resolve a node's `input_mappings` (`prompt_placeholder -> context_key`)
/// against the execution's accumulated context, producing the substitution
/// map the dispatcher applies to the assembled prompt. A context key with
/// no value yet resolves to an empty string rather than skipping the
/// placeholder.
fn resolve_input_substitutions(
    node: &WorkflowNode,
    context: &HashMap<String, String>,
) -> HashMap<String, String> {
    node.input_mappings
        .iter()
        .map(|(placeholder, context_key)| {
            (placeholder.clone(), context.get(context_key).cloned().unwrap_or_default())
        })
        .collect()
}

fn node_permanently_blocked(
    graph: &WorkflowGraph,
    node: &WorkflowNode,
    results: &HashMap<String, NodeResult>,
    context: &HashMap<String, String>,
) -> bool {
    let incoming: Vec<&WorkflowEdge> = graph.edges.iter().filter(|e| e.to == node.id).collect();
    if incoming.is_empty() {
        return true;
    }
    let all_sources_terminal = incoming.iter().all(|e| {
        results
            .get(&e.from)
            .map(|r| node_state_is_terminal(r.state))
            .unwrap_or(false)
    });
    if !all_sources_terminal {
        return false;
    }
    !incoming_satisfied(graph, node, results, context)
}

fn is_stuck(
    graph: &WorkflowGraph,
    results: &HashMap<String, NodeResult>,
    context: &HashMap<String, String>,
) -> bool {
    if results.values().any(|r| r.state == NodeState::Running) {
        return false;
    }
    let any_end_succeeded = graph.nodes.iter().any(|n| {
        matches!(n.kind, NodeKind::End)
            && results.get(&n.id).map(|r| r.state == NodeState::Succeeded).unwrap_or(false)
    });
    if any_end_succeeded {
        return false;
    }

    graph
        .nodes
        .iter()
        .filter(|n| !matches!(n.kind, NodeKind::Start))
        .all(|n| match results.get(&n.id) {
            Some(r) if r.state != NodeState::Pending => true,
            _ => node_permanently_blocked(graph, n, results, context),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str, priority: i32, condition: &str) -> WorkflowEdge {
        WorkflowEdge {
            from: from.to_string(),
            to: to.to_string(),
            priority,
            condition: condition.to_string(),
        }
    }

    fn node(id: &str, kind: NodeKind) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            kind,
            input_mappings: HashMap::new(),
            output_mappings: HashMap::new(),
            retry_max_attempts: 0,
            timeout_seconds: None,
        }
    }

    fn linear_graph() -> WorkflowGraph {
        WorkflowGraph {
            nodes: vec![
                node("start", NodeKind::Start),
                node(
                    "agent1",
                    NodeKind::Agent {
                        agent_id: Uuid::new_v4().to_string(),
                    },
                ),
                node("end", NodeKind::End),
            ],
            edges: vec![edge("start", "agent1", 0, ""), edge("agent1", "end", 0, "")],
        }
    }

    #[test]
    fn incoming_satisfied_once_source_succeeds() {
        let graph = linear_graph();
        let mut results = HashMap::new();
        results.insert(
            "start".to_string(),
            NodeResult {
                state: NodeState::Succeeded,
                ..NodeResult::default()
            },
        );
        let ctx = HashMap::new();
        let agent_node = graph.node("agent1").unwrap();
        assert!(incoming_satisfied(&graph, agent_node, &results, &ctx));
    }

    #[test]
    fn incoming_not_satisfied_before_source_resolves() {
        let graph = linear_graph();
        let results = HashMap::new();
        let ctx = HashMap::new();
        let agent_node = graph.node("agent1").unwrap();
        assert!(!incoming_satisfied(&graph, agent_node, &results, &ctx));
    }

    #[test]
    fn priority_ordering_picks_lowest_passing_edge() {
        let mut graph = linear_graph();
        graph.nodes.push(node(
            "agent2",
            NodeKind::Agent {
                agent_id: Uuid::new_v4().to_string(),
            },
        ));
        graph.edges = vec![
            edge("start", "agent1", 0, "node.state == Succeeded"),
            edge("start", "agent2", 1, "node.state == Succeeded"),
        ];
        let mut results = HashMap::new();
        results.insert(
            "start".to_string(),
            NodeResult {
                state: NodeState::Succeeded,
                ..NodeResult::default()
            },
        );
        let ctx = HashMap::new();
        assert!(incoming_satisfied(&graph, graph.node("agent1").unwrap(), &results, &ctx));
        assert!(!incoming_satisfied(&graph, graph.node("agent2").unwrap(), &results, &ctx));
    }

    #[test]
    fn resolve_input_substitutions_maps_placeholder_to_context_value() {
        let node = WorkflowNode {
            id: "agent1".to_string(),
            kind: NodeKind::Agent { agent_id: Uuid::new_v4().to_string() },
            input_mappings: HashMap::from([("prior_score".to_string(), "score".to_string())]),
            output_mappings: HashMap::new(),
            retry_max_attempts: 0,
            timeout_seconds: None,
        };
        let context = HashMap::from([("score".to_string(), "7".to_string())]);
        let subs = resolve_input_substitutions(&node, &context);
        assert_eq!(subs.get("prior_score"), Some(&"7".to_string()));
    }

    #[test]
    fn resolve_input_substitutions_defaults_missing_context_key_to_empty() {
        let node = WorkflowNode {
            id: "agent1".to_string(),
            kind: NodeKind::Agent { agent_id: Uuid::new_v4().to_string() },
            input_mappings: HashMap::from([("prior_score".to_string(), "missing".to_string())]),
            output_mappings: HashMap::new(),
            retry_max_attempts: 0,
            timeout_seconds: None,
        };
        let subs = resolve_input_substitutions(&node, &HashMap::new());
        assert_eq!(subs.get("prior_score"), Some(&String::new()));
    }

    #[test]
    fn default_edge_does_not_activate_on_dead_lettered_source() {
        let graph = linear_graph();
        let mut results = HashMap::new();
        results.insert(
            "agent1".to_string(),
            NodeResult { state: NodeState::DeadLettered, ..NodeResult::default() },
        );
        let ctx = HashMap::new();
        assert!(!incoming_satisfied(&graph, graph.node("end").unwrap(), &results, &ctx));
    }

    #[test]
    fn explicit_condition_can_route_a_dead_lettered_source() {
        let mut graph = linear_graph();
        graph.edges = vec![
            edge("start", "agent1", 0, ""),
            edge("agent1", "end", 0, "node.state == DeadLettered"),
        ];
        let mut results = HashMap::new();
        results.insert(
            "agent1".to_string(),
            NodeResult { state: NodeState::DeadLettered, ..NodeResult::default() },
        );
        let ctx = HashMap::new();
        assert!(incoming_satisfied(&graph, graph.node("end").unwrap(), &results, &ctx));
    }

    #[test]
    fn stuck_when_all_pending_nodes_permanently_blocked() {
        let graph = linear_graph();
        let mut results = HashMap::new();
        results.insert(
            "start".to_string(),
            NodeResult {
                state: NodeState::Succeeded,
                ..NodeResult::default()
            },
        );
        results.insert(
            "agent1".to_string(),
            NodeResult {
                state: NodeState::DeadLettered,
                ..NodeResult::default()
            },
        );
        let ctx = HashMap::new();
        assert!(is_stuck(&graph, &results, &ctx));
    }

    #[test]
    fn not_stuck_while_a_node_is_running() {
        let graph = linear_graph();
        let mut results = HashMap::new();
        results.insert(
            "start".to_string(),
            NodeResult {
                state: NodeState::Succeeded,
                ..NodeResult::default()
            },
        );
        results.insert(
            "agent1".to_string(),
            NodeResult {
                state: NodeState::Running,
                ..NodeResult::default()
            },
        );
        let ctx = HashMap::new();
        assert!(!is_stuck(&graph, &results, &ctx));
    }
}
