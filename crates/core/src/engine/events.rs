//! # Engine Events
//!
//! Every mutation publishes the updated record so dependents (the pipeline
//! conductor, the server's SSE stream and autosave) observe it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::clock::{Clock, SystemClock};
use super::pipeline::AgentPipeline;
use super::run::AgentRun;
use crate::graph::CanvasGraph;
use crate::new_id;
use crate::state::Namespace;

/// What changed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEventKind {
    /// Graph topology or execution overlay changed
    CanvasUpdated { graph: CanvasGraph },
    /// A run was created or mutated
    RunUpdated { run: AgentRun },
    /// Terminal runs were dropped from history
    RunsPruned { removed: usize },
    /// A pipeline was created or mutated
    PipelineUpdated { pipeline: AgentPipeline },
    /// A pipeline was deleted
    PipelineRemoved { pipeline_id: String },
    /// A canvas walk ended
    ExecutionFinished {
        walk_id: String,
        completed: usize,
        stopped: bool,
    },
}

impl FlowEventKind {
    /// Persistence namespace affected by this event
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::CanvasUpdated { .. } | Self::ExecutionFinished { .. } => Namespace::Canvas,
            Self::RunUpdated { .. } | Self::RunsPruned { .. } => Namespace::Runs,
            Self::PipelineUpdated { .. } | Self::PipelineRemoved { .. } => Namespace::Pipelines,
        }
    }
}

/// An event on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: FlowEventKind,
}

impl FlowEvent {
    pub fn new(kind: FlowEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            timestamp,
            kind,
        }
    }
}

/// Broadcast bus shared by all engines of one `FlowEngine`. Events are
/// stamped by the bus clock.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish; having no subscribers is fine
    pub fn publish(&self, kind: FlowEventKind) {
        let _ = self.tx.send(FlowEvent::new(kind, self.clock.now()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
