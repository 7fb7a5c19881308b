//! # Canvas Graph Model
//!
//! Nodes carry an agent type and a task; connections are directed edges
//! between two distinct nodes. Every editing gesture is idempotent: invalid
//! or stale requests change nothing and report `false`/`None`.

use serde::{Deserialize, Serialize};

use crate::catalog::PipelineTemplate;
use crate::new_id;

/// Name given to a fresh or cleared canvas
pub const DEFAULT_GRAPH_NAME: &str = "Untitled Workflow";

/// Horizontal spacing between template nodes
const TEMPLATE_X_ORIGIN: f64 = 100.0;
const TEMPLATE_X_STEP: f64 = 320.0;
const TEMPLATE_Y: f64 = 200.0;

/// Execution overlay status shared by nodes and connections
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

/// Canvas coordinates; carried through, never interpreted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node on the canvas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    pub id: String,
    pub agent_type: String,
    #[serde(default)]
    pub task: String,
    pub position: Position,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Option<String>,
}

/// A directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasConnection {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
}

/// The full editable workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasGraph {
    pub name: String,
    /// Insertion order is preserved; linearization seeds from it
    pub nodes: Vec<CanvasNode>,
    pub connections: Vec<CanvasConnection>,
    #[serde(default)]
    pub selected_node_id: Option<String>,
    /// Source of a two-phase connect gesture in progress
    #[serde(default)]
    pub connecting_from: Option<String>,
}

impl Default for CanvasGraph {
    fn default() -> Self {
        Self {
            name: DEFAULT_GRAPH_NAME.to_string(),
            nodes: Vec::new(),
            connections: Vec::new(),
            selected_node_id: None,
            connecting_from: None,
        }
    }
}

impl CanvasGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut CanvasNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn connection(&self, id: &str) -> Option<&CanvasConnection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Connections whose target is `node_id`
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CanvasConnection> {
        self.connections
            .iter()
            .filter(move |c| c.target_node_id == node_id)
    }

    /// Connections whose source is `node_id`
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CanvasConnection> {
        self.connections
            .iter()
            .filter(move |c| c.source_node_id == node_id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.connections
            .iter()
            .any(|c| c.source_node_id == source && c.target_node_id == target)
    }

    /// Add a node and return its id
    pub fn add_node(&mut self, agent_type: &str, x: f64, y: f64, task: Option<&str>) -> String {
        let id = new_id();
        self.nodes.push(CanvasNode {
            id: id.clone(),
            agent_type: agent_type.to_string(),
            task: task.unwrap_or_default().to_string(),
            position: Position { x, y },
            status: ExecutionStatus::Idle,
            output: None,
        });
        id
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        if self.nodes.len() == before {
            return false;
        }

        self.connections
            .retain(|c| c.source_node_id != id && c.target_node_id != id);
        if self.selected_node_id.as_deref() == Some(id) {
            self.selected_node_id = None;
        }
        if self.connecting_from.as_deref() == Some(id) {
            self.connecting_from = None;
        }
        true
    }

    pub fn update_node_position(&mut self, id: &str, x: f64, y: f64) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.position = Position { x, y };
                true
            }
            None => false,
        }
    }

    pub fn update_node_task(&mut self, id: &str, task: &str) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.task = task.to_string();
                true
            }
            None => false,
        }
    }

    /// Set a node's execution status; `output` replaces the stored output
    /// only when given
    pub fn update_node_status(
        &mut self,
        id: &str,
        status: ExecutionStatus,
        output: Option<String>,
    ) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.status = status;
                if output.is_some() {
                    node.output = output;
                }
                true
            }
            None => false,
        }
    }

    pub fn update_connection_status(&mut self, id: &str, status: ExecutionStatus) -> bool {
        match self.connections.iter_mut().find(|c| c.id == id) {
            Some(conn) => {
                conn.status = status;
                true
            }
            None => false,
        }
    }

    /// Connect two nodes. Self-loops, duplicate edges and unknown endpoints
    /// are ignored.
    pub fn add_connection(&mut self, source: &str, target: &str) -> Option<String> {
        if source == target || self.has_edge(source, target) {
            return None;
        }
        if self.node(source).is_none() || self.node(target).is_none() {
            return None;
        }

        let id = new_id();
        self.connections.push(CanvasConnection {
            id: id.clone(),
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            status: ExecutionStatus::Idle,
        });
        Some(id)
    }

    /// First phase of the connect gesture
    pub fn start_connecting(&mut self, source: &str) -> bool {
        if self.node(source).is_none() {
            return false;
        }
        self.connecting_from = Some(source.to_string());
        true
    }

    /// Second phase of the connect gesture. The pending cursor is always
    /// cleared, whether or not an edge results.
    pub fn complete_connection(&mut self, target: &str) -> Option<String> {
        let source = self.connecting_from.take()?;
        self.add_connection(&source, target)
    }

    pub fn cancel_connecting(&mut self) -> bool {
        self.connecting_from.take().is_some()
    }

    pub fn remove_connection(&mut self, id: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.id != id);
        self.connections.len() != before
    }

    /// Select a node, or clear the selection with `None`
    pub fn select_node(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.node(id).is_none() => false,
            Some(id) => {
                self.selected_node_id = Some(id.to_string());
                true
            }
            None => {
                self.selected_node_id = None;
                true
            }
        }
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Return every node and connection to `Idle` without touching topology
    pub fn reset_execution(&mut self) {
        for node in &mut self.nodes {
            node.status = ExecutionStatus::Idle;
            node.output = None;
        }
        for conn in &mut self.connections {
            conn.status = ExecutionStatus::Idle;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Replace the graph with one node per template stage, chained left to
    /// right
    pub fn load_from_template(&mut self, template: &PipelineTemplate) {
        self.clear();
        self.name = template.name.clone();

        let mut previous: Option<String> = None;
        for (i, stage) in template.stages.iter().enumerate() {
            let x = TEMPLATE_X_ORIGIN + TEMPLATE_X_STEP * i as f64;
            let id = self.add_node(&stage.agent_type, x, TEMPLATE_Y, Some(&stage.task));
            if let Some(prev) = previous {
                self.add_connection(&prev, &id);
            }
            previous = Some(id);
        }
    }
}
