//! Validates a workflow graph: acyclic, exactly one `Start`, at least one
//! `End`, no self-loops, unique edge priorities per source, every non-Start
//! node reachable from `Start`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Agent { agent_id: String },
    Delay { seconds: i64 },
    Approval { role: String },
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// `prompt_placeholder -> context_key` substitutions applied before an
    /// `Agent` node dispatches. Unused by other node kinds.
    #[serde(default)]
    pub input_mappings: HashMap<String, String>,
    /// `context_key -> source` assignments applied once this node reaches a
    /// terminal state, where `source` is one of `run.summary`, `run.state`,
    /// `run.prurl`, `node.state`, `node.summary`.
    #[serde(default)]
    pub output_mappings: HashMap<String, String>,
    #[serde(default)]
    pub retry_max_attempts: i32,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    pub priority: i32,
    #[serde(default)]
    pub condition: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow must have exactly one Start node, found {0}")]
    StartNodeCount(usize),

    #[error("workflow must have at least one End node")]
    NoEndNode,

    #[error("edge {from} -> {to} is a self-loop")]
    SelfLoop { from: String, to: String },

    #[error("graph contains a cycle")]
    Cyclic,

    #[error("node {source} has duplicate out-edge priority {priority}")]
    DuplicatePriority { source: String, priority: i32 },

    #[error("node {0} is unreachable from Start")]
    Unreachable(String),

    #[error("edge references unknown node {0}")]
    UnknownNode(String),
}

impl WorkflowGraph {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let node_ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        let start_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        if start_count != 1 {
            return Err(ValidationError::StartNodeCount(start_count));
        }

        let end_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::End)
            .count();
        if end_count == 0 {
            return Err(ValidationError::NoEndNode);
        }

        for edge in &self.edges {
            if !node_ids.contains(edge.from.as_str()) {
                return Err(ValidationError::UnknownNode(edge.from.clone()));
            }
            if !node_ids.contains(edge.to.as_str()) {
                return Err(ValidationError::UnknownNode(edge.to.clone()));
            }
            if edge.from == edge.to {
                return Err(ValidationError::SelfLoop {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        let mut priorities_by_source: HashMap<&str, HashSet<i32>> = HashMap::new();
        for edge in &self.edges {
            let seen = priorities_by_source.entry(edge.from.as_str()).or_default();
            if !seen.insert(edge.priority) {
                return Err(ValidationError::DuplicatePriority {
                    source: edge.from.clone(),
                    priority: edge.priority,
                });
            }
        }

        let adjacency = self.adjacency();

        self.check_acyclic(&adjacency)?;

        let start_id = self
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Start)
            .map(|n| n.id.as_str())
            .expect("exactly one start node checked above");
        self.check_reachable(start_id, &adjacency)?;

        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        adjacency
    }

    fn check_acyclic(&self, adjacency: &HashMap<&str, Vec<&str>>) -> Result<(), ValidationError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), ValidationError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(ValidationError::Cyclic),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(children) = adjacency.get(node) {
                for child in children {
                    visit(child, adjacency, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for node in &self.nodes {
            visit(node.id.as_str(), adjacency, &mut marks)?;
        }
        Ok(())
    }

    fn check_reachable(
        &self,
        start_id: &str,
        adjacency: &HashMap<&str, Vec<&str>>,
    ) -> Result<(), ValidationError> {
        let mut visited = HashSet::new();
        let mut stack = vec![start_id];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if let Some(children) = adjacency.get(node) {
                stack.extend(children.iter().copied());
            }
        }

        for node in &self.nodes {
            if node.kind != NodeKind::Start && !visited.contains(node.id.as_str()) {
                return Err(ValidationError::Unreachable(node.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn edge(from: &str, to: &str, priority: i32) -> WorkflowEdge {
        WorkflowEdge {
            from: from.to_string(),
            to: to.to_string(),
            priority,
            condition: String::new(),
        }
    }

    fn valid_graph() -> WorkflowGraph {
        WorkflowGraph {
            nodes: vec![
                node("start", NodeKind::Start),
                node(
                    "agent1",
                    NodeKind::Agent {
                        agent_id: "a1".to_string(),
                    },
                ),
                node("end", NodeKind::End),
            ],
            edges: vec![edge("start", "agent1", 0), edge("agent1", "end", 0)],
        }
    }

    #[test]
    fn valid_graph_passes() {
        assert!(valid_graph().validate().is_ok());
    }

    #[test]
    fn rejects_zero_or_multiple_start_nodes() {
        let mut g = valid_graph();
        g.nodes.push(node("start2", NodeKind::Start));
        assert_eq!(g.validate(), Err(ValidationError::StartNodeCount(2)));
    }

    #[test]
    fn rejects_missing_end_node() {
        let mut g = valid_graph();
        g.nodes.retain(|n| n.kind != NodeKind::End);
        g.edges.retain(|e| e.to != "end");
        assert_eq!(g.validate(), Err(ValidationError::NoEndNode));
    }

    #[test]
    fn rejects_self_loop() {
        let mut g = valid_graph();
        g.edges.push(edge("agent1", "agent1", 1));
        assert_eq!(
            g.validate(),
            Err(ValidationError::SelfLoop {
                from: "agent1".to_string(),
                to: "agent1".to_string(),
            })
        );
    }

    #[test]
    fn rejects_cycle() {
        let mut g = valid_graph();
        g.edges.push(edge("end", "agent1", 1));
        assert_eq!(g.validate(), Err(ValidationError::Cyclic));
    }

    #[test]
    fn rejects_duplicate_priority_per_source() {
        let mut g = valid_graph();
        g.nodes.push(node(
            "agent2",
            NodeKind::Agent {
                agent_id: "a2".to_string(),
            },
        ));
        g.edges.push(edge("start", "agent2", 0));
        assert_eq!(
            g.validate(),
            Err(ValidationError::DuplicatePriority {
                source: "start".to_string(),
                priority: 0,
            })
        );
    }

    #[test]
    fn rejects_unreachable_node() {
        let mut g = valid_graph();
        g.nodes.push(node(
            "orphan",
            NodeKind::Agent {
                agent_id: "a3".to_string(),
            },
        ));
        assert_eq!(
            g.validate(),
            Err(ValidationError::Unreachable("orphan".to_string()))
        );
    }
}
