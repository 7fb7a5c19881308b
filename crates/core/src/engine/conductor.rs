//! # Pipeline Conductor
//!
//! Ties the pipeline engine to the run engine. Each Running stage is backed
//! by one run; the conductor starts it, watches `RunUpdated` events and
//! turns the run's outcome into `advance_stage` or `fail_pipeline`.
//!
//! ```text
//! stage Running ──▶ start_agent ──▶ run ... Completed ──▶ advance_stage ──▶ next stage
//!                                       └── Failed/Cancelled ──▶ fail_pipeline
//! ```
//!
//! The two engines never share state; bindings (run id -> stage) live here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::events::{EventBus, FlowEventKind};
use super::pipeline::{AgentPipeline, PipelineEngine, PipelineStage, PipelineStatus, StageStatus};
use super::run::{AgentRun, RunEngine, RunStatus};

#[derive(Debug, Clone)]
struct Binding {
    pipeline_id: String,
    stage_id: String,
}

struct ConductorInner {
    runs: RunEngine,
    pipelines: PipelineEngine,
    bindings: Mutex<HashMap<String, Binding>>,
}

/// Drives pipelines by running their stages
#[derive(Clone)]
pub struct Conductor {
    inner: Arc<ConductorInner>,
}

/// Text handed to the next stage when a run finished without a result
fn run_output(run: &AgentRun) -> String {
    run.result.clone().unwrap_or_else(|| {
        run.steps
            .iter()
            .rev()
            .find_map(|s| s.output.clone())
            .unwrap_or_default()
    })
}

impl Conductor {
    pub fn new(runs: RunEngine, pipelines: PipelineEngine) -> Self {
        Self {
            inner: Arc::new(ConductorInner {
                runs,
                pipelines,
                bindings: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.inner.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bind(&self, run_id: &str, pipeline_id: &str, stage_id: &str) {
        self.bindings().insert(
            run_id.to_string(),
            Binding {
                pipeline_id: pipeline_id.to_string(),
                stage_id: stage_id.to_string(),
            },
        );
    }

    fn unbind(&self, run_id: &str) -> Option<Binding> {
        self.bindings().remove(run_id)
    }

    /// Run ids currently backing a stage
    pub fn bound_runs(&self) -> Vec<String> {
        self.bindings().keys().cloned().collect()
    }

    /// Start a draft pipeline and the run behind its first stage
    pub fn start(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.inner.pipelines.run_pipeline(pipeline_id)?;
        Some(self.drive(pipeline))
    }

    /// Start a run for the active stage when it has none yet
    fn drive(&self, pipeline: AgentPipeline) -> AgentPipeline {
        if pipeline.status != PipelineStatus::Running {
            return pipeline;
        }
        match pipeline.active_stage() {
            Some(stage) if stage.status == StageStatus::Running && stage.run_id.is_none() => {
                let stage = stage.clone();
                self.start_stage_run(&pipeline.id, &stage).unwrap_or(pipeline)
            }
            _ => pipeline,
        }
    }

    fn start_stage_run(&self, pipeline_id: &str, stage: &PipelineStage) -> Option<AgentPipeline> {
        let run = match self.inner.runs.start_agent(&stage.agent_type, &stage.task) {
            Ok(run) => run,
            Err(err) => {
                tracing::warn!(pipeline_id = %pipeline_id, stage_id = %stage.id, error = %err, "Stage could not start");
                return self.inner.pipelines.fail_pipeline(pipeline_id);
            }
        };

        self.bind(&run.id, pipeline_id, &stage.id);
        tracing::info!(
            pipeline_id = %pipeline_id,
            stage_id = %stage.id,
            run_id = %run.id,
            "Stage run started"
        );
        let updated = self.inner.pipelines.update_stage_status(
            pipeline_id,
            &stage.id,
            StageStatus::Running,
            Some(run.id.clone()),
            None,
        );

        // Zero-delay runs can finish before the binding existed
        self.settle(&run.id, updated)
    }

    /// Apply the outcome of a run that may have finished while unbound
    fn settle(&self, run_id: &str, fallback: Option<AgentPipeline>) -> Option<AgentPipeline> {
        match self.inner.runs.run(run_id) {
            Some(current) if current.status.is_terminal() => self.on_run(&current).or(fallback),
            _ => fallback,
        }
    }

    /// React to a run update. Only terminal runs with a binding matter; the
    /// binding is claimed so each outcome is applied once.
    pub fn on_run(&self, run: &AgentRun) -> Option<AgentPipeline> {
        if !run.status.is_terminal() {
            return None;
        }
        let binding = self.unbind(&run.id)?;

        match run.status {
            RunStatus::Completed => {
                let output = run_output(run);
                let pipeline =
                    self.inner
                        .pipelines
                        .advance_stage(&binding.pipeline_id, &binding.stage_id, &output)?;
                Some(self.drive(pipeline))
            }
            _ => {
                tracing::warn!(
                    pipeline_id = %binding.pipeline_id,
                    run_id = %run.id,
                    status = ?run.status,
                    "Stage run did not complete"
                );
                self.inner.pipelines.fail_pipeline(&binding.pipeline_id)
            }
        }
    }

    /// Pause the pipeline and the run behind its active stage. Stage
    /// statuses are left alone.
    pub fn pause(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.inner.pipelines.pause_pipeline(pipeline_id)?;
        if let Some(run_id) = pipeline.active_stage().and_then(|s| s.run_id.as_deref()) {
            self.inner.runs.pause_run(run_id);
        }
        Some(pipeline)
    }

    /// Resume the pipeline and the run behind its active stage. A stage
    /// whose run is gone gets a fresh run.
    pub fn resume(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let pipeline = self.inner.pipelines.resume_pipeline(pipeline_id)?;
        let Some(stage) = pipeline.active_stage().cloned() else {
            return Some(pipeline);
        };

        let run = stage.run_id.as_deref().and_then(|id| self.inner.runs.run(id));
        match run {
            None => self.start_stage_run(pipeline_id, &stage).or(Some(pipeline)),
            Some(run) => {
                // Bindings do not survive a restart
                self.bind(&run.id, pipeline_id, &stage.id);
                if run.status == RunStatus::Paused {
                    self.inner.runs.resume_run(&run.id);
                }
                self.settle(&run.id, Some(pipeline))
            }
        }
    }

    /// Advance a stage by hand. The stage's run is released and completed,
    /// and the next stage gets a run of its own.
    pub fn advance(&self, pipeline_id: &str, stage_id: &str, output: &str) -> Option<AgentPipeline> {
        let run_id = self
            .inner
            .pipelines
            .pipeline(pipeline_id)?
            .stage(stage_id)?
            .run_id
            .clone();
        let pipeline = self.inner.pipelines.advance_stage(pipeline_id, stage_id, output)?;
        if let Some(run_id) = run_id {
            self.unbind(&run_id);
            self.inner.runs.complete_run(&run_id);
        }
        Some(self.drive(pipeline))
    }

    /// Cancel the pipeline and the run behind its active stage
    pub fn cancel(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let run_id = self.active_run_id(pipeline_id);
        let pipeline = self.inner.pipelines.cancel_pipeline(pipeline_id)?;
        if let Some(run_id) = run_id {
            self.unbind(&run_id);
            self.inner.runs.cancel_run(&run_id);
        }
        Some(pipeline)
    }

    /// Fail the pipeline and the run behind its active stage
    pub fn fail(&self, pipeline_id: &str) -> Option<AgentPipeline> {
        let run_id = self.active_run_id(pipeline_id);
        let pipeline = self.inner.pipelines.fail_pipeline(pipeline_id)?;
        if let Some(run_id) = run_id {
            self.unbind(&run_id);
            self.inner.runs.fail_run(&run_id);
        }
        Some(pipeline)
    }

    /// Cancel whatever is in flight, then drop the pipeline
    pub fn delete(&self, pipeline_id: &str) -> bool {
        self.cancel(pipeline_id);
        self.inner.pipelines.delete_pipeline(pipeline_id)
    }

    fn active_run_id(&self, pipeline_id: &str) -> Option<String> {
        self.inner
            .pipelines
            .pipeline(pipeline_id)?
            .active_stage()?
            .run_id
            .clone()
    }

    /// Re-read every bound run and apply outcomes that were missed
    pub fn reconcile(&self) -> usize {
        let mut applied = 0;
        for run_id in self.bound_runs() {
            match self.inner.runs.run(&run_id) {
                Some(run) if run.status.is_terminal() => {
                    if self.on_run(&run).is_some() {
                        applied += 1;
                    }
                }
                Some(_) => {}
                None => {
                    if let Some(binding) = self.unbind(&run_id) {
                        tracing::warn!(run_id = %run_id, "Bound run disappeared");
                        self.inner.pipelines.fail_pipeline(&binding.pipeline_id);
                        applied += 1;
                    }
                }
            }
        }
        applied
    }

    /// Follow run updates on the bus until it closes
    pub fn spawn(&self, events: &EventBus) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let conductor = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let FlowEventKind::RunUpdated { run } = event.kind {
                            conductor.on_run(&run);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Conductor lagged behind events; reconciling");
                        conductor.reconcile();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Conductor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AgentCatalog;
    use crate::config::STEP_DELAY;
    use crate::engine::clock::{FixedDelay, SystemClock};
    use crate::engine::scheduler::Scheduler;
    use crate::graph::StageSpec;
    use std::time::Duration;

    struct Harness {
        runs: RunEngine,
        pipelines: PipelineEngine,
        conductor: Conductor,
        events: EventBus,
    }

    fn harness() -> Harness {
        let events = EventBus::default();
        let clock = Arc::new(SystemClock);
        let scheduler = Scheduler::new(Arc::new(FixedDelay(Duration::from_secs(1))));
        let runs = RunEngine::new(
            Arc::new(AgentCatalog::default()),
            clock.clone(),
            scheduler,
            events.clone(),
            STEP_DELAY,
        );
        let pipelines = PipelineEngine::new(clock, events.clone());
        let conductor = Conductor::new(runs.clone(), pipelines.clone());
        Harness {
            runs,
            pipelines,
            conductor,
            events,
        }
    }

    fn draft(h: &Harness) -> AgentPipeline {
        h.pipelines.create_pipeline(
            "Post",
            "",
            vec![StageSpec::new("writer", "Draft"), StageSpec::new("reviewer", "Review")],
            None,
        )
    }

    async fn wait_terminal(h: &Harness, pipeline_id: &str) -> AgentPipeline {
        for _ in 0..200 {
            let p = h.pipelines.pipeline(pipeline_id).unwrap();
            if p.is_complete() {
                return p;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("pipeline never finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_runs_stage_by_stage() {
        let h = harness();
        let _loop = h.conductor.spawn(&h.events);
        let p = draft(&h);

        let started = h.conductor.start(&p.id).unwrap();
        let first_run = started.stages[0].run_id.clone().unwrap();
        assert!(started.stages[1].run_id.is_none());

        let done = wait_terminal(&h, &p.id).await;
        assert!(done.is_success());
        assert_eq!(
            done.stages[0].output.as_deref(),
            Some("Writer completed 3 steps for: Draft")
        );
        assert_eq!(
            done.stages[1].output.as_deref(),
            Some("Reviewer completed 3 steps for: Review")
        );

        // The second run only started after the first one finished
        let first = h.runs.run(&first_run).unwrap();
        let second = h.runs.run(done.stages[1].run_id.as_deref().unwrap()).unwrap();
        assert!(second.started_at >= first.completed_at.unwrap());
        assert!(h.conductor.bound_runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_follow_the_active_run() {
        let h = harness();
        let _loop = h.conductor.spawn(&h.events);
        let p = draft(&h);
        h.conductor.start(&p.id);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let paused = h.conductor.pause(&p.id).unwrap();
        assert_eq!(paused.status, PipelineStatus::Paused);
        assert_eq!(paused.stages[0].status, StageStatus::Running);
        let run_id = paused.stages[0].run_id.clone().unwrap();
        assert_eq!(h.runs.run(&run_id).unwrap().status, RunStatus::Paused);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.runs.run(&run_id).unwrap().completed_steps(), 1);

        let resumed = h.conductor.resume(&p.id).unwrap();
        assert_eq!(resumed.status, PipelineStatus::Running);
        assert_eq!(resumed.stages[0].status, StageStatus::Running);
        assert_eq!(h.runs.run(&run_id).unwrap().status, RunStatus::Running);

        assert!(wait_terminal(&h, &p.id).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_keep_stage_statuses() {
        let h = harness();
        let p = draft(&h);
        let started = h.conductor.start(&p.id).unwrap();
        let before: Vec<StageStatus> = started.stages.iter().map(|s| s.status).collect();

        let paused = h.conductor.pause(&p.id).unwrap();
        let after_pause: Vec<StageStatus> = paused.stages.iter().map(|s| s.status).collect();
        assert_eq!(after_pause, before);
        assert_eq!(
            h.pipelines.pipeline(&p.id).unwrap().active_stage().unwrap().id,
            started.stages[0].id
        );

        let resumed = h.conductor.resume(&p.id).unwrap();
        let after_resume: Vec<StageStatus> = resumed.stages.iter().map(|s| s.status).collect();
        assert_eq!(after_resume, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_active_run() {
        let h = harness();
        let _loop = h.conductor.spawn(&h.events);
        let p = draft(&h);
        let started = h.conductor.start(&p.id).unwrap();
        let run_id = started.stages[0].run_id.clone().unwrap();

        let cancelled = h.conductor.cancel(&p.id).unwrap();
        assert_eq!(cancelled.status, PipelineStatus::Failed);
        assert_eq!(cancelled.stages[0].status, StageStatus::Cancelled);
        assert_eq!(h.runs.run(&run_id).unwrap().status, RunStatus::Cancelled);
        assert!(h.conductor.cancel(&p.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_advance_releases_run() {
        let h = harness();
        let _loop = h.conductor.spawn(&h.events);
        let p = draft(&h);
        let started = h.conductor.start(&p.id).unwrap();
        let first_run = started.stages[0].run_id.clone().unwrap();
        let stage_id = started.stages[0].id.clone();

        let advanced = h.conductor.advance(&p.id, &stage_id, "by hand").unwrap();
        assert_eq!(advanced.stages[0].status, StageStatus::Completed);
        assert_eq!(advanced.stages[0].output.as_deref(), Some("by hand"));
        assert!(advanced.stages[1].run_id.is_some());
        assert_eq!(h.runs.run(&first_run).unwrap().status, RunStatus::Completed);

        // Stage is no longer active
        assert!(h.conductor.advance(&p.id, &stage_id, "again").is_none());
        assert!(wait_terminal(&h, &p.id).await.is_success());
        assert_eq!(
            h.pipelines.pipeline(&p.id).unwrap().stages[0].output.as_deref(),
            Some("by hand")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_fails_pipeline() {
        let h = harness();
        let _loop = h.conductor.spawn(&h.events);
        let p = draft(&h);
        let started = h.conductor.start(&p.id).unwrap();

        h.runs.fail_run(started.stages[0].run_id.as_deref().unwrap());
        let failed = wait_terminal(&h, &p.id).await;
        assert_eq!(failed.status, PipelineStatus::Failed);
        assert_eq!(failed.stages[0].status, StageStatus::Failed);
        assert_eq!(failed.stages[1].status, StageStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_stage_agent_fails_pipeline() {
        let h = harness();
        let p = h
            .pipelines
            .create_pipeline("x", "", vec![StageSpec::new("poet", "Rhyme")], None);

        let p = h.conductor.start(&p.id).unwrap();
        assert_eq!(p.status, PipelineStatus::Failed);
        assert!(h.runs.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_applies_missed_outcomes() {
        // No event loop: outcomes are only picked up by reconcile
        let h = harness();
        let p = draft(&h);
        h.conductor.start(&p.id);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = h.pipelines.pipeline(&p.id).unwrap();
        assert_eq!(before.stages[0].status, StageStatus::Running);

        assert_eq!(h.conductor.reconcile(), 1);
        let after = h.pipelines.pipeline(&p.id).unwrap();
        assert_eq!(after.stages[0].status, StageStatus::Completed);
        assert_eq!(after.stages[1].status, StageStatus::Running);
        assert!(after.stages[1].run_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_restore_rebinds() {
        let h = harness();
        let p = draft(&h);
        h.conductor.start(&p.id);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Simulate a restart: fresh engines rehydrated from snapshots
        let fresh = harness();
        let _loop = fresh.conductor.spawn(&fresh.events);
        fresh.runs.restore(h.runs.snapshot());
        fresh.pipelines.restore(h.pipelines.snapshot());
        h.runs.cancel_run(&h.runs.runs()[0].id);

        assert!(fresh.conductor.resume(&p.id).is_some());
        assert!(wait_terminal(&fresh, &p.id).await.is_success());
    }
}
