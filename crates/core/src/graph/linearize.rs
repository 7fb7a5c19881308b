//! # Graph Linearization
//!
//! Kahn's topological sort over the canvas. Ready nodes are processed in
//! the order they entered the ready queue: initial seeds in node insertion
//! order, later ones as their last predecessor is emitted.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::model::CanvasGraph;

/// An executable stage derived from a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Node the stage came from, if any
    #[serde(default)]
    pub node_id: Option<String>,
    pub agent_type: String,
    pub task: String,
}

impl StageSpec {
    pub fn new(agent_type: &str, task: &str) -> Self {
        Self {
            node_id: None,
            agent_type: agent_type.to_string(),
            task: task.to_string(),
        }
    }
}

/// Ordered stages plus the nodes a cycle kept out of the order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Linearization {
    pub stages: Vec<StageSpec>,
    /// Node ids that never reached zero in-degree, in insertion order
    pub omitted: Vec<String>,
}

impl Linearization {
    pub fn is_complete(&self) -> bool {
        self.omitted.is_empty()
    }
}

/// Task text used when a node has none
pub fn default_task(agent_type: &str) -> String {
    format!("Run {} agent", agent_type)
}

/// Topologically order the graph, reporting nodes lost to cycles
pub fn linearize(graph: &CanvasGraph) -> Linearization {
    if graph.nodes.is_empty() {
        return Linearization::default();
    }

    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for conn in &graph.connections {
        if let Some(degree) = in_degree.get_mut(conn.target_node_id.as_str()) {
            *degree += 1;
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order: Vec<&str> = Vec::with_capacity(graph.nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for conn in graph.outgoing(id) {
            if let Some(degree) = in_degree.get_mut(conn.target_node_id.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(conn.target_node_id.as_str());
                }
            }
        }
    }

    let stages = order
        .iter()
        .filter_map(|id| graph.node(id))
        .map(|node| StageSpec {
            node_id: Some(node.id.clone()),
            agent_type: node.agent_type.clone(),
            task: if node.task.is_empty() {
                default_task(&node.agent_type)
            } else {
                node.task.clone()
            },
        })
        .collect();

    let omitted: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !order.contains(&n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();

    if !omitted.is_empty() {
        tracing::warn!(
            graph = %graph.name,
            omitted = omitted.len(),
            "Cycle detected; nodes left out of linearization"
        );
    }

    Linearization { stages, omitted }
}

/// Ordered stages only
pub fn to_stages(graph: &CanvasGraph) -> Vec<StageSpec> {
    linearize(graph).stages
}
