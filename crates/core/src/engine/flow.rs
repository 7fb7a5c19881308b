//! # Flow Engine
//!
//! One explicit instance of the whole system: catalog, router, canvas, run
//! and pipeline engines, the conductor and an optional snapshot store, all
//! sharing one event bus. Several instances can coexist.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::canvas::CanvasEngine;
use super::clock::{Clock, DelayGenerator, RandomDelay, SystemClock};
use super::conductor::Conductor;
use super::events::{EventBus, FlowEvent};
use super::pipeline::{AgentPipeline, PipelineEngine, PipelineSnapshot};
use super::run::{AgentRun, RunEngine, RunSnapshot};
use super::scheduler::Scheduler;
use crate::catalog::AgentCatalog;
use crate::config::EngineConfig;
use crate::error::FlowError;
use crate::graph::{CanvasGraph, StageSpec};
use crate::orchestrator::{IntentRouter, PipelineDetection, RoutingTable};
use crate::state::{FlowDb, Namespace, SnapshotStore};

/// Longest pipeline name derived from launch text
const LAUNCH_NAME_LIMIT: usize = 48;

/// Injectable dependencies of a `FlowEngine`
pub struct EngineParts {
    pub catalog: AgentCatalog,
    /// Custom routing table; the built-in one when `None`
    pub routing: Option<RoutingTable>,
    pub clock: Arc<dyn Clock>,
    pub delays: Arc<dyn DelayGenerator>,
    pub store: Option<Arc<dyn SnapshotStore>>,
}

impl Default for EngineParts {
    fn default() -> Self {
        Self {
            catalog: AgentCatalog::default(),
            routing: None,
            clock: Arc::new(SystemClock),
            delays: Arc::new(RandomDelay),
            store: None,
        }
    }
}

impl EngineParts {
    pub fn with_catalog(mut self, catalog: AgentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_delays(mut self, delays: Arc<dyn DelayGenerator>) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// What `launch` did with a piece of text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Launch {
    /// No agent matched
    Nothing { detection: PipelineDetection },
    /// One agent matched and was started
    Run {
        detection: PipelineDetection,
        run: AgentRun,
    },
    /// Several agents matched; a pipeline was created and started
    Pipeline {
        detection: PipelineDetection,
        pipeline: AgentPipeline,
    },
}

/// A pipeline built from the canvas plus the nodes a cycle left out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasPipeline {
    pub pipeline: AgentPipeline,
    pub omitted: Vec<String>,
}

/// The assembled engine
pub struct FlowEngine {
    catalog: Arc<AgentCatalog>,
    router: IntentRouter,
    events: EventBus,
    canvas: CanvasEngine,
    runs: RunEngine,
    pipelines: PipelineEngine,
    conductor: Conductor,
    store: Option<Arc<dyn SnapshotStore>>,
    conductor_task: JoinHandle<()>,
}

impl FlowEngine {
    /// Build from configuration: optional catalog and routing files, and the
    /// SQLite store at `db_path`. Must be called within a Tokio runtime.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut parts = EngineParts::default();
        if let Some(path) = &config.catalog_path {
            parts.catalog = AgentCatalog::load(path)?;
        }
        if let Some(path) = &config.routing_path {
            parts.routing = Some(RoutingTable::load(path)?);
        }
        let db = FlowDb::open_at(&config.db_path)?;
        parts.store = Some(Arc::new(db));

        Self::from_parts(parts, config).context("Failed to assemble engine")
    }

    /// Build from explicit parts. Must be called within a Tokio runtime.
    pub fn from_parts(parts: EngineParts, config: &EngineConfig) -> Result<Self, FlowError> {
        let router = match &parts.routing {
            Some(table) => IntentRouter::new(table, &parts.catalog)?,
            None => IntentRouter::with_defaults(&parts.catalog),
        };

        let catalog = Arc::new(parts.catalog);
        let events = EventBus::new(config.event_capacity).with_clock(Arc::clone(&parts.clock));
        let scheduler = Scheduler::new(parts.delays);

        let runs = RunEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&parts.clock),
            scheduler.clone(),
            events.clone(),
            config.step_delay,
        );
        let pipelines = PipelineEngine::new(parts.clock, events.clone());
        let canvas = CanvasEngine::new(
            Arc::clone(&catalog),
            scheduler,
            events.clone(),
            config.node_delay,
        );
        let conductor = Conductor::new(runs.clone(), pipelines.clone());
        let conductor_task = conductor.spawn(&events);

        tracing::info!(agents = catalog.list().len(), "Flow engine ready");

        Ok(Self {
            catalog,
            router,
            events,
            canvas,
            runs,
            pipelines,
            conductor,
            store: parts.store,
            conductor_task,
        })
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn canvas(&self) -> &CanvasEngine {
        &self.canvas
    }

    pub fn runs(&self) -> &RunEngine {
        &self.runs
    }

    pub fn pipelines(&self) -> &PipelineEngine {
        &self.pipelines
    }

    /// Pipeline control that keeps the backing runs in step
    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn detect_pipeline(&self, text: &str) -> PipelineDetection {
        self.router.detect_pipeline(text)
    }

    /// Route `text` and start whatever it maps to
    pub fn launch(&self, text: &str) -> Result<Launch, FlowError> {
        let detection = self.router.detect_pipeline(text);
        let task = text.trim();

        match detection.agents.as_slice() {
            [] => Ok(Launch::Nothing { detection }),
            [agent] => {
                let run = self.runs.start_agent(agent, task)?;
                Ok(Launch::Run { detection, run })
            }
            agents => {
                let stages = agents.iter().map(|a| StageSpec::new(a, task)).collect();
                let draft = self
                    .pipelines
                    .create_pipeline(&launch_name(task), task, stages, None);
                let pipeline = self.conductor.start(&draft.id).unwrap_or(draft);
                Ok(Launch::Pipeline {
                    detection,
                    pipeline,
                })
            }
        }
    }

    /// Create a draft pipeline from the linearized canvas
    pub fn pipeline_from_canvas(&self) -> CanvasPipeline {
        let graph = self.canvas.graph();
        let linearization = self.canvas.linearize();
        let pipeline = self.pipelines.create_pipeline(
            &graph.name,
            &format!("Built from canvas '{}'", graph.name),
            linearization.stages,
            None,
        );
        CanvasPipeline {
            pipeline,
            omitted: linearization.omitted,
        }
    }

    // === Persistence ===

    fn snapshot_json(&self, namespace: Namespace) -> Result<String> {
        let json = match namespace {
            Namespace::Canvas => serde_json::to_string(&self.canvas.snapshot()),
            Namespace::Runs => serde_json::to_string(&self.runs.snapshot()),
            Namespace::Pipelines => serde_json::to_string(&self.pipelines.snapshot()),
        };
        json.with_context(|| format!("Failed to serialize '{}' snapshot", namespace.as_str()))
    }

    /// Save one namespace to the store (no-op without a store)
    pub async fn persist(&self, namespace: Namespace) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let json = self.snapshot_json(namespace)?;
        store.save(namespace, &json).await
    }

    pub async fn persist_all(&self) -> Result<()> {
        for namespace in Namespace::ALL {
            self.persist(namespace).await?;
        }
        Ok(())
    }

    /// Restore every namespace the store holds
    pub async fn rehydrate(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for namespace in Namespace::ALL {
            let Some(json) = store.load(namespace).await? else {
                continue;
            };
            let context = || format!("Corrupt '{}' snapshot", namespace.as_str());
            match namespace {
                Namespace::Canvas => {
                    let graph: CanvasGraph = serde_json::from_str(&json).with_context(context)?;
                    self.canvas.restore(graph);
                }
                Namespace::Runs => {
                    let snapshot: RunSnapshot = serde_json::from_str(&json).with_context(context)?;
                    self.runs.restore(snapshot);
                }
                Namespace::Pipelines => {
                    let snapshot: PipelineSnapshot =
                        serde_json::from_str(&json).with_context(context)?;
                    self.pipelines.restore(snapshot);
                }
            }
        }
        Ok(())
    }
}

impl Drop for FlowEngine {
    fn drop(&mut self) {
        self.conductor_task.abort();
    }
}

/// Pipeline name for launched text, cut at a character boundary
fn launch_name(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(LAUNCH_NAME_LIMIT).collect();
    if chars.next().is_some() {
        format!("{}...", head.trim_end())
    } else {
        head
    }
}
