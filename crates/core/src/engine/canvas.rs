//! # Canvas Engine
//!
//! Owns the editable `CanvasGraph` and drives the execution overlay: a
//! sequential walk over the linearized graph that moves each node (and the
//! connections around it) through Running and Completed.
//!
//! The walk only touches `status`/`output`; topology belongs to the editing
//! operations.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::events::{EventBus, FlowEventKind};
use super::scheduler::{Scheduler, TimerKey};
use crate::catalog::templates::find_template;
use crate::catalog::AgentCatalog;
use crate::config::DelayRange;
use crate::error::FlowError;
use crate::graph::{linearize, CanvasConnection, CanvasGraph, ExecutionStatus, Linearization, StageSpec};
use crate::new_id;

/// Output written to a node interrupted by `stop_execution`
pub const STOPPED_OUTPUT: &str = "Execution stopped";

/// How a walk ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalkReport {
    /// Nodes that reached Completed
    pub completed: usize,
    pub stopped: bool,
}

/// A started canvas walk
#[derive(Debug)]
pub struct Execution {
    pub walk_id: String,
    /// Node ids in walk order
    pub order: Vec<String>,
    /// Node ids a cycle kept out of the walk
    pub omitted: Vec<String>,
    pub task: JoinHandle<WalkReport>,
}

struct ActiveWalk {
    id: String,
    /// Node currently Running
    current: Option<String>,
}

struct CanvasState {
    graph: CanvasGraph,
    walk: Option<ActiveWalk>,
}

impl CanvasState {
    /// True while `walk_id` is still the active walk
    fn owns(&self, walk_id: &str) -> bool {
        self.walk.as_ref().is_some_and(|w| w.id == walk_id)
    }
}

struct CanvasInner {
    catalog: Arc<AgentCatalog>,
    scheduler: Scheduler,
    events: EventBus,
    node_delay: DelayRange,
    state: Mutex<CanvasState>,
}

/// Canvas editing plus the execution driver
#[derive(Clone)]
pub struct CanvasEngine {
    inner: Arc<CanvasInner>,
}

fn mark_connections(
    graph: &mut CanvasGraph,
    status: ExecutionStatus,
    select: impl Fn(&CanvasConnection) -> bool,
) {
    for conn in graph.connections.iter_mut().filter(|c| select(c)) {
        conn.status = status;
    }
}

impl CanvasEngine {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        scheduler: Scheduler,
        events: EventBus,
        node_delay: DelayRange,
    ) -> Self {
        Self {
            inner: Arc::new(CanvasInner {
                catalog,
                scheduler,
                events,
                node_delay,
                state: Mutex::new(CanvasState {
                    graph: CanvasGraph::new(),
                    walk: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CanvasState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, graph: CanvasGraph) {
        self.inner
            .events
            .publish(FlowEventKind::CanvasUpdated { graph });
    }

    /// Run `f` against the graph; publish when it reports a change
    fn edit(&self, f: impl FnOnce(&mut CanvasGraph) -> bool) -> bool {
        let snapshot = {
            let mut state = self.state();
            f(&mut state.graph).then(|| state.graph.clone())
        };
        let changed = snapshot.is_some();
        if let Some(graph) = snapshot {
            self.publish(graph);
        }
        changed
    }

    /// Unconditional edit
    fn apply(&self, f: impl FnOnce(&mut CanvasGraph)) {
        self.edit(|g| {
            f(g);
            true
        });
    }

    pub fn graph(&self) -> CanvasGraph {
        self.state().graph.clone()
    }

    // === Editing ===

    /// Add a node of a catalogued agent type
    pub fn add_node(&self, agent_type: &str, x: f64, y: f64, task: Option<&str>) -> Result<String, FlowError> {
        if !self.inner.catalog.contains(agent_type) {
            return Err(FlowError::UnknownAgent(agent_type.to_string()));
        }
        let mut id = String::new();
        self.apply(|g| id = g.add_node(agent_type, x, y, task));
        tracing::debug!(node_id = %id, agent_type = %agent_type, "Node added");
        Ok(id)
    }

    pub fn remove_node(&self, id: &str) -> bool {
        self.edit(|g| g.remove_node(id))
    }

    pub fn update_node_position(&self, id: &str, x: f64, y: f64) -> bool {
        self.edit(|g| g.update_node_position(id, x, y))
    }

    pub fn update_node_task(&self, id: &str, task: &str) -> bool {
        self.edit(|g| g.update_node_task(id, task))
    }

    pub fn update_node_status(&self, id: &str, status: ExecutionStatus, output: Option<String>) -> bool {
        self.edit(|g| g.update_node_status(id, status, output))
    }

    pub fn update_connection_status(&self, id: &str, status: ExecutionStatus) -> bool {
        self.edit(|g| g.update_connection_status(id, status))
    }

    pub fn add_connection(&self, source: &str, target: &str) -> Option<String> {
        let mut id = None;
        self.edit(|g| {
            id = g.add_connection(source, target);
            id.is_some()
        });
        id
    }

    pub fn start_connecting(&self, source: &str) -> bool {
        self.edit(|g| g.start_connecting(source))
    }

    /// Finishing always ends the gesture, so the graph changes whenever one
    /// was pending
    pub fn complete_connection(&self, target: &str) -> Option<String> {
        let mut id = None;
        self.edit(|g| {
            let pending = g.connecting_from.is_some();
            id = g.complete_connection(target);
            pending
        });
        id
    }

    pub fn cancel_connecting(&self) -> bool {
        self.edit(|g| g.cancel_connecting())
    }

    pub fn remove_connection(&self, id: &str) -> bool {
        self.edit(|g| g.remove_connection(id))
    }

    pub fn select_node(&self, id: Option<&str>) -> bool {
        self.edit(|g| g.select_node(id))
    }

    pub fn rename(&self, name: &str) {
        self.apply(|g| g.rename(name));
    }

    pub fn reset_execution(&self) {
        self.apply(|g| g.reset_execution());
    }

    /// Empty the canvas, stopping any walk first
    pub fn clear(&self) {
        self.stop_execution();
        self.apply(|g| g.clear());
    }

    /// Replace the canvas with a built-in template
    pub fn load_template(&self, template_id: &str) -> Result<(), FlowError> {
        let template = find_template(template_id)
            .ok_or_else(|| FlowError::UnknownTemplate(template_id.to_string()))?;
        self.stop_execution();
        self.apply(|g| g.load_from_template(&template));
        tracing::info!(template = %template_id, "Canvas loaded from template");
        Ok(())
    }

    pub fn linearize(&self) -> Linearization {
        linearize(&self.state().graph)
    }

    // === Execution ===

    pub fn is_executing(&self) -> bool {
        self.state().walk.is_some()
    }

    /// Start walking the linearized graph. Returns `None` when there is
    /// nothing to walk or a walk is already in progress.
    pub fn execute(&self) -> Option<Execution> {
        let walk_id = new_id();
        let linearization = {
            let mut state = self.state();
            if state.walk.is_some() {
                tracing::warn!("Canvas execution already in progress");
                return None;
            }
            let linearization = linearize(&state.graph);
            if linearization.stages.is_empty() {
                return None;
            }
            state.walk = Some(ActiveWalk {
                id: walk_id.clone(),
                current: None,
            });
            linearization
        };

        tracing::info!(
            walk_id = %walk_id,
            nodes = linearization.stages.len(),
            omitted = linearization.omitted.len(),
            "Canvas execution started"
        );

        let order = linearization
            .stages
            .iter()
            .filter_map(|s| s.node_id.clone())
            .collect();
        let task = tokio::spawn(self.clone().walk(walk_id.clone(), linearization.stages));

        Some(Execution {
            walk_id,
            order,
            omitted: linearization.omitted,
            task,
        })
    }

    async fn walk(self, walk_id: String, stages: Vec<StageSpec>) -> WalkReport {
        let mut completed = 0;
        let mut stopped = false;

        for (step, stage) in stages.iter().enumerate() {
            let Some(node_id) = stage.node_id.as_deref() else {
                continue;
            };
            if !self.begin_node(&walk_id, node_id) {
                stopped = true;
                break;
            }
            let fired = self
                .inner
                .scheduler
                .sleep(TimerKey::new(&walk_id, step), self.inner.node_delay)
                .await;
            if !fired || !self.finish_node(&walk_id, stage) {
                stopped = true;
                break;
            }
            completed += 1;
        }

        if !stopped {
            let mut state = self.state();
            if state.owns(&walk_id) {
                state.walk = None;
            }
        }

        tracing::info!(walk_id = %walk_id, completed, stopped, "Canvas execution finished");
        self.inner.events.publish(FlowEventKind::ExecutionFinished {
            walk_id,
            completed,
            stopped,
        });
        WalkReport { completed, stopped }
    }

    /// Node and its incoming connections go Running
    fn begin_node(&self, walk_id: &str, node_id: &str) -> bool {
        let graph = {
            let mut state = self.state();
            if !state.owns(walk_id) {
                return false;
            }
            if let Some(walk) = state.walk.as_mut() {
                walk.current = Some(node_id.to_string());
            }
            state.graph.update_node_status(node_id, ExecutionStatus::Running, None);
            mark_connections(&mut state.graph, ExecutionStatus::Running, |c| {
                c.target_node_id == node_id
            });
            state.graph.clone()
        };
        tracing::debug!(walk_id = %walk_id, node_id = %node_id, "Node running");
        self.publish(graph);
        true
    }

    /// Node and its incoming connections complete; outgoing ones go Running
    fn finish_node(&self, walk_id: &str, stage: &StageSpec) -> bool {
        let Some(node_id) = stage.node_id.as_deref() else {
            return false;
        };
        let output = format!(
            "{} finished: {}",
            self.inner.catalog.label_of(&stage.agent_type),
            stage.task
        );
        let graph = {
            let mut state = self.state();
            if !state.owns(walk_id) {
                return false;
            }
            if let Some(walk) = state.walk.as_mut() {
                walk.current = None;
            }
            state
                .graph
                .update_node_status(node_id, ExecutionStatus::Completed, Some(output));
            mark_connections(&mut state.graph, ExecutionStatus::Completed, |c| {
                c.target_node_id == node_id
            });
            mark_connections(&mut state.graph, ExecutionStatus::Running, |c| {
                c.source_node_id == node_id
            });
            state.graph.clone()
        };
        self.publish(graph);
        true
    }

    /// Stop the active walk. The in-flight node and its incoming
    /// connections are marked Error.
    pub fn stop_execution(&self) -> bool {
        let graph = {
            let mut state = self.state();
            let Some(walk) = state.walk.take() else {
                return false;
            };
            self.inner.scheduler.revoke_unit(&walk.id);
            if let Some(node_id) = walk.current.as_deref() {
                state.graph.update_node_status(
                    node_id,
                    ExecutionStatus::Error,
                    Some(STOPPED_OUTPUT.to_string()),
                );
                mark_connections(&mut state.graph, ExecutionStatus::Error, |c| {
                    c.target_node_id == node_id
                });
            }
            tracing::info!(walk_id = %walk.id, "Canvas execution stopped");
            state.graph.clone()
        };
        self.publish(graph);
        true
    }

    // === Persistence ===

    pub fn snapshot(&self) -> CanvasGraph {
        self.graph()
    }

    /// Replace the graph. Execution statuses are kept as saved.
    pub fn restore(&self, graph: CanvasGraph) {
        self.stop_execution();
        let nodes = graph.nodes.len();
        self.state().graph = graph;
        tracing::info!(nodes, "Canvas restored");
    }
}
