use std::collections::HashMap;

use chrono::{DateTime, Utc};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::State;

use super::node::Node;

/// A workflow: nodes, single-successor edges, and a start node.
///
/// Edges are checked against the node set when added. Decision branch
/// targets and Loop back-targets are not; `validate()` leaves them alone and
/// `dangling_targets()` reports any that point nowhere.
#[derive(Debug)]
pub struct WorkflowGraph {
    id: String,
    nodes: HashMap<String, Node>,
    edges: HashMap<String, String>,
    start_node: Option<String>,
    created_at: DateTime<Utc>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            start_node: None,
            created_at: Utc::now(),
        }
    }

    /// Add a node, optionally designating it as the start node.
    ///
    /// Fails without modifying the graph if the id is taken, or if `is_start`
    /// is requested while a start node is already designated.
    pub fn add_node(&mut self, node: impl Into<Node>, is_start: bool) -> Result<&mut Self> {
        let node = node.into();
        let id = node.id().to_string();

        if self.nodes.contains_key(&id) {
            return Err(FlowError::DuplicateNode(id));
        }
        if is_start {
            if let Some(existing) = &self.start_node {
                return Err(FlowError::StartAlreadySet(existing.clone()));
            }
            self.start_node = Some(id.clone());
        }

        self.nodes.insert(id, node);
        Ok(self)
    }

    /// Declare `to` as the successor of `from`, replacing any earlier edge.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<&mut Self> {
        for endpoint in [from, to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(FlowError::UnknownNode(endpoint.to_string()));
            }
        }
        self.edges.insert(from.to_string(), to.to_string());
        Ok(self)
    }

    /// Designate the start node, overwriting any previous designation.
    pub fn set_start_node(&mut self, id: &str) -> Result<&mut Self> {
        if !self.nodes.contains_key(id) {
            return Err(FlowError::UnknownNode(id.to_string()));
        }
        self.start_node = Some(id.to_string());
        Ok(self)
    }

    /// Structural check. Reachability from the start node is not required.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(FlowError::InvalidGraph("No nodes defined".to_string()));
        }

        let start = self
            .start_node
            .as_deref()
            .ok_or_else(|| FlowError::InvalidGraph("No start node defined".to_string()))?;

        if !self.nodes.contains_key(start) {
            return Err(FlowError::InvalidGraph(format!(
                "Start node '{}' not found",
                start
            )));
        }

        let mut edges: Vec<_> = self.edges.iter().collect();
        edges.sort();
        for (from, to) in edges {
            if !self.nodes.contains_key(from) {
                return Err(FlowError::InvalidGraph(format!(
                    "Edge source '{}' not found",
                    from
                )));
            }
            if !self.nodes.contains_key(to) {
                return Err(FlowError::InvalidGraph(format!(
                    "Edge target '{}' not found",
                    to
                )));
            }
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Routing policy, evaluated after `current` has transformed state.
    ///
    /// Decision nodes follow their branch table. Loop nodes jump to their
    /// back-target while the condition holds, ignoring the edge map, and fall
    /// through to it otherwise. Everything else follows the edge map; no edge
    /// means the run is over.
    pub fn get_next_node(&self, current: &str, state: &State) -> Result<Option<String>> {
        match self.nodes.get(current) {
            Some(Node::Decision(decision)) => decision.resolve(state).map(Some),
            Some(Node::Loop(looping)) if looping.should_loop(state) => {
                Ok(Some(looping.loop_back_to().to_string()))
            }
            _ => Ok(self.edges.get(current).cloned()),
        }
    }

    /// `(node, target)` pairs for branch and loop targets naming unknown nodes.
    pub fn dangling_targets(&self) -> Vec<(String, String)> {
        let mut dangling: Vec<(String, String)> = self
            .nodes
            .values()
            .flat_map(|node| -> Vec<(String, String)> {
                match node {
                    Node::Decision(d) => d
                        .branches()
                        .values()
                        .map(|target| (d.id().to_string(), target.clone()))
                        .collect(),
                    Node::Loop(l) => vec![(l.id().to_string(), l.loop_back_to().to_string())],
                    _ => Vec::new(),
                }
            })
            .filter(|(_, target)| !self.nodes.contains_key(target))
            .collect();
        dangling.sort();
        dangling.dedup();
        dangling
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node ids in sorted order.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn edges(&self) -> &HashMap<String, String> {
        &self.edges
    }

    pub fn start_node(&self) -> Option<&str> {
        self.start_node.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{DecisionNode, FunctionNode, LoopNode};
    use flowrun_core::types::Args;
    use serde_json::{json, Value};

    fn noop(id: &str) -> FunctionNode {
        FunctionNode::new(id, |_: Args| -> Result<Value> { Ok(json!({})) })
    }

    #[test]
    fn test_empty_graph() {
        let graph = WorkflowGraph::new("test-graph");
        assert_eq!(graph.id(), "test-graph");
        assert!(graph.is_empty());
        assert_eq!(graph.start_node(), None);
        assert!(graph.created_at() <= Utc::now());
    }

    #[test]
    fn test_add_nodes_and_edge() {
        let mut graph = WorkflowGraph::new("g");
        graph
            .add_node(noop("node1"), true)
            .unwrap()
            .add_node(noop("node2"), false)
            .unwrap()
            .add_edge("node1", "node2")
            .unwrap();

        assert_eq!(graph.start_node(), Some("node1"));
        assert_eq!(graph.edges().get("node1").map(String::as_str), Some("node2"));
        assert_eq!(graph.node_ids(), vec!["node1", "node2"]);
    }

    #[test]
    fn test_duplicate_node_fails() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("node1"), true).unwrap();
        let err = graph.add_node(noop("node1"), false).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateNode(ref id) if id == "node1"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_second_start_flag_fails_without_inserting() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("a"), true).unwrap();
        let err = graph.add_node(noop("b"), true).unwrap_err();
        assert!(matches!(err, FlowError::StartAlreadySet(ref id) if id == "a"));
        assert!(!graph.contains("b"));
        assert_eq!(graph.start_node(), Some("a"));
    }

    #[test]
    fn test_set_start_node_overwrites() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("a"), true).unwrap();
        graph.add_node(noop("b"), false).unwrap();
        graph.set_start_node("b").unwrap();
        assert_eq!(graph.start_node(), Some("b"));

        let err = graph.set_start_node("zzz").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(_)));
    }

    #[test]
    fn test_edge_to_unknown_node_fails() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("node1"), true).unwrap();
        let err = graph.add_edge("node1", "nonexistent").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(ref id) if id == "nonexistent"));
        let err = graph.add_edge("ghost", "node1").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(ref id) if id == "ghost"));
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_validate_cases() {
        let mut graph = WorkflowGraph::new("g");
        let err = graph.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid graph: No nodes defined");

        graph.add_node(noop("node1"), false).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid graph: No start node defined");

        graph.set_start_node("node1").unwrap();
        assert!(graph.validate().is_ok());
        // Idempotent.
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_disconnected_nodes_are_valid() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("a"), true).unwrap();
        graph.add_node(noop("island"), false).unwrap();
        assert!(graph.is_valid());
    }

    #[test]
    fn test_routing_follows_edges() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("a"), true).unwrap();
        graph.add_node(noop("b"), false).unwrap();
        graph.add_edge("a", "b").unwrap();

        let state = State::new();
        assert_eq!(graph.get_next_node("a", &state).unwrap(), Some("b".to_string()));
        assert_eq!(graph.get_next_node("b", &state).unwrap(), None);
    }

    #[test]
    fn test_routing_decision() {
        let mut graph = WorkflowGraph::new("g");
        graph
            .add_node(
                DecisionNode::new(
                    "grade",
                    |s: &State| {
                        if s.get_i64("score").unwrap_or(0) >= 8 { "high" } else { "low" }.to_string()
                    },
                    [("high", "pass"), ("low", "fail")],
                ),
                true,
            )
            .unwrap();
        graph.add_node(noop("pass"), false).unwrap();
        graph.add_node(noop("fail"), false).unwrap();

        let high = State::new().with("score", json!(9));
        let low = State::new().with("score", json!(5));
        assert_eq!(graph.get_next_node("grade", &high).unwrap(), Some("pass".into()));
        assert_eq!(graph.get_next_node("grade", &low).unwrap(), Some("fail".into()));
        // Pure function of state.
        assert_eq!(
            graph.get_next_node("grade", &high).unwrap(),
            graph.get_next_node("grade", &high).unwrap()
        );
    }

    #[test]
    fn test_routing_loop_ignores_edges_while_true() {
        let mut graph = WorkflowGraph::new("g");
        graph.add_node(noop("increment"), true).unwrap();
        graph
            .add_node(
                LoopNode::new("check", |s: &State| s.get_i64("counter").unwrap_or(0) < 5, "increment"),
                false,
            )
            .unwrap();
        graph.add_node(noop("done"), false).unwrap();
        graph.add_edge("increment", "check").unwrap();
        graph.add_edge("check", "done").unwrap();

        let looping = State::new().with("counter", json!(1));
        let finished = State::new().with("counter", json!(5));
        assert_eq!(graph.get_next_node("check", &looping).unwrap(), Some("increment".into()));
        assert_eq!(graph.get_next_node("check", &finished).unwrap(), Some("done".into()));
    }

    #[test]
    fn test_dangling_targets_reported_not_enforced() {
        let mut graph = WorkflowGraph::new("g");
        graph
            .add_node(LoopNode::new("check", |_: &State| true, "nowhere"), true)
            .unwrap();
        graph
            .add_node(
                DecisionNode::new("d", |_: &State| "x".to_string(), [("x", "check"), ("y", "gone")]),
                false,
            )
            .unwrap();

        assert!(graph.is_valid());
        assert_eq!(
            graph.dangling_targets(),
            vec![
                ("check".to_string(), "nowhere".to_string()),
                ("d".to_string(), "gone".to_string()),
            ]
        );
    }
}
