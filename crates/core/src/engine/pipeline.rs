//! # Pipeline Engine
//!
//! Multi-stage sequences of runs, advanced strictly left to right.
//!
//! ```text
//! Draft ──▶ Running ◀──▶ Paused
//!              │            │
//!              ├──▶ Completed (last stage advanced)
//!              └──▶ Failed ◀┘ (failed or cancelled)
//! ```
//!
//! The engine only records progress. Starting the runs that back each
//! stage is the conductor's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::clock::Clock;
use super::events::{EventBus, FlowEventKind};
use super::update_where;
use crate::catalog::templates::find_template;
use crate::error::FlowError;
use crate::graph::StageSpec;
use crate::new_id;

/// Status of a pipeline stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl StageStatus {
    /// Running or Paused: the stage currently holding the pipeline
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// One position in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub id: String,
    pub agent_type: String,
    pub task: String,
    pub status: StageStatus,
    /// Run backing this stage, once started
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Status of a pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An ordered sequence of stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPipeline {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub template_id: Option<String>,
    pub stages: Vec<PipelineStage>,
    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentPipeline {
    pub fn new(
        name: &str,
        description: &str,
        stages: Vec<StageSpec>,
        template_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
            template_id: template_id.map(str::to_string),
            stages: stages
                .into_iter()
                .map(|spec| PipelineStage {
                    id: new_id(),
                    agent_type: spec.agent_type,
                    task: spec.task,
                    status: StageStatus::Pending,
                    run_id: None,
                    output: None,
                })
                .collect(),
            status: PipelineStatus::Draft,
            created_at: now,
            completed_at: None,
        }
    }

    /// The Running or Paused stage, if any
    pub fn active_stage(&self) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.status.is_active())
    }

    pub fn stage(&self, stage_id: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Check if pipeline is finished either way
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    fn finish(&mut self, status: PipelineStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }

    /// Draft -> Running, first stage Running. With no stages the pipeline
    /// completes on the spot.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != PipelineStatus::Draft {
            return false;
        }
        self.status = PipelineStatus::Running;
        match self.stages.first_mut() {
            Some(first) => first.status = StageStatus::Running,
            None => self.finish(PipelineStatus::Completed, now),
        }
        true
    }

    /// Complete the active stage with `output` and hand off to the next
    pub fn advance_stage(&mut self, stage_id: &str, output: &str, now: DateTime<Utc>) -> bool {
        if self.is_complete() || self.status == PipelineStatus::Draft {
            return false;
        }
        let Some(index) = self.stages.iter().position(|s| s.id == stage_id) else {
            return false;
        };
        if !self.stages[index].status.is_active() {
            return false;
        }

        let stage = &mut self.stages[index];
        stage.status = StageStatus::Completed;
        stage.output = Some(output.to_string());

        match self.stages.get_mut(index + 1) {
            Some(next) => next.status = StageStatus::Running,
            None => self.finish(PipelineStatus::Completed, now),
        }
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.status != PipelineStatus::Running {
            return false;
        }
        self.status = PipelineStatus::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.status != PipelineStatus::Paused {
            return false;
        }
        self.status = PipelineStatus::Running;
        true
    }

    /// Fail the pipeline, marking the active stage `stage_status`
    fn abort(&mut self, stage_status: StageStatus, now: DateTime<Utc>) -> bool {
        if self.is_complete() {
            return false;
        }
        if let Some(stage) = self.stages.iter_mut().find(|s| s.status.is_active()) {
            stage.status = stage_status;
        }
        self.finish(PipelineStatus::Failed, now);
        true
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        self.abort(StageStatus::Cancelled, now)
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> bool {
        self.abort(StageStatus::Failed, now)
    }

    /// Attach run progress to a stage without advancing
    pub fn update_stage_status(
        &mut self,
        stage_id: &str,
        status: StageStatus,
        run_id: Option<String>,
        output: Option<String>,
    ) -> bool {
        if self.is_complete() {
            return false;
        }
        let Some(stage) = self.stages.iter_mut().find(|s| s.id == stage_id) else {
            return false;
        };
        stage.status = status;
        if run_id.is_some() {
            stage.run_id = run_id;
        }
        if output.is_some() {
            stage.output = output;
        }
        true
    }
}

/// Serializable pipeline list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineSnapshot {
    /// Most recent first
    pub pipelines: Vec<AgentPipeline>,
}

struct PipelineInner {
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<PipelineSnapshot>,
}

/// Owner of every `AgentPipeline`
#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<PipelineInner>,
}

impl PipelineEngine {
    pub fn new(clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                clock,
                events,
                state: Mutex::new(PipelineSnapshot::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PipelineSnapshot> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, pipeline: &AgentPipeline) {
        self.inner.events.publish(FlowEventKind::PipelineUpdated {
            pipeline: pipeline.clone(),
        });
    }

    /// Apply a state-machine transition and publish when it took effect
    fn mutate(
        &self,
        pipeline_id: &str,
        f: impl FnOnce(&mut AgentPipeline, DateTime<Utc>) -> bool,
    ) -> Option<AgentPipeline> {
        let now = self.inner.clock.now();
        let updated = update_where(&mut self.state().pipelines, |p| p.id == pipeline_id, |p| f(p, now))?;
        self.publish(&updated);
        Some(updated)
    }

    pub fn create_pipeline(
        &self,
        name: &str,
        description: &str,
        stages: Vec<StageSpec>,
        template_id: Option<&str>,
    ) -> AgentPipeline {
        let pipeline = AgentPipeline::new(name, description, stages, template_id, self.inner.clock.now());
        self.state().pipelines.insert(0, pipeline.clone());
        tracing::info!(
            pipeline_id = %pipeline.id,
            stages = pipeline.stages.len(),
            "Pipeline created"
        );
        self.publish(&pipeline);
        pipeline
    }

    /// Create a draft pipeline from a built-in template
    pub fn create_from_template(&self, template_id: &str) -> Result<AgentPipeline, FlowError> {
        let template = find_template(template_id)
            .ok_or_else(|| FlowError::UnknownTemplate(template_id.to_string()))?;
        let stages = template
            .stages
            .iter()
            .map(|s| StageSpec::new(&s.agent_type, &s.task))
            .collect();
        Ok(self.create_pipeline(&template.name, &template.description, stages, Some(&template.id)))
    }

    pub fn run_pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.mutate(pipeline_id, |p, now| p.start(now))?;
        tracing::info!(pipeline_id = %pipeline_id, status = ?pipeline.status, "Pipeline started");
        Some(pipeline)
    }

    pub fn advance_stage(&self, pipeline_id: &str, stage_id: &str, output: &str) -> Option<AgentPipeline> {
        let pipeline = self.mutate(pipeline_id, |p, now| p.advance_stage(stage_id, output, now))?;
        if pipeline.is_success() {
            tracing::info!(pipeline_id = %pipeline_id, "Pipeline completed");
        } else {
            tracing::debug!(pipeline_id = %pipeline_id, stage_id = %stage_id, "Stage advanced");
        }
        Some(pipeline)
    }

    pub fn pause_pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        self.mutate(pipeline_id, |p, _| p.pause())
    }

    pub fn resume_pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        self.mutate(pipeline_id, |p, _| p.resume())
    }

    pub fn cancel_pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.mutate(pipeline_id, |p, now| p.cancel(now))?;
        tracing::info!(pipeline_id = %pipeline_id, "Pipeline cancelled");
        Some(pipeline)
    }

    pub fn fail_pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.mutate(pipeline_id, |p, now| p.fail(now))?;
        tracing::warn!(pipeline_id = %pipeline_id, "Pipeline failed");
        Some(pipeline)
    }

    pub fn update_stage_status(
        &self,
        pipeline_id: &str,
        stage_id: &str,
        status: StageStatus,
        run_id: Option<String>,
        output: Option<String>,
    ) -> Option<AgentPipeline> {
        self.mutate(pipeline_id, |p, _| {
            p.update_stage_status(stage_id, status, run_id, output)
        })
    }

    pub fn delete_pipeline(&self, pipeline_id: &str) -> bool {
        let removed = {
            let mut state = self.state();
            let before = state.pipelines.len();
            state.pipelines.retain(|p| p.id != pipeline_id);
            before != state.pipelines.len()
        };
        if removed {
            tracing::info!(pipeline_id = %pipeline_id, "Pipeline deleted");
            self.inner.events.publish(FlowEventKind::PipelineRemoved {
                pipeline_id: pipeline_id.to_string(),
            });
        }
        removed
    }

    // === Queries ===

    pub fn pipelines(&self) -> Vec<AgentPipeline> {
        self.state().pipelines.clone()
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        self.state()
            .pipelines
            .iter()
            .find(|p| p.id == pipeline_id)
            .cloned()
    }

    // === Persistence ===

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.state().clone()
    }

    /// Replace all pipelines. Running pipelines come back paused, matching
    /// the runs behind their active stages.
    pub fn restore(&self, mut snapshot: PipelineSnapshot) {
        for pipeline in &mut snapshot.pipelines {
            if pipeline.status == PipelineStatus::Running {
                pipeline.status = PipelineStatus::Paused;
            }
        }
        let count = snapshot.pipelines.len();
        *self.state() = snapshot;
        tracing::info!(pipelines = count, "Pipelines restored");
    }
}
