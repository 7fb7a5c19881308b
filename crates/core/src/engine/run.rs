//! # Run Engine
//!
//! Lifecycle of a single agent invocation.
//!
//! ```text
//! Running ──▶ Paused ──▶ Running
//!    │           │
//!    ├──▶ Completed (all steps done, or forced)
//!    ├──▶ Failed
//!    └──▶ Cancelled ◀──┘
//! ```
//!
//! Steps advance one at a time through the scheduler. Terminal runs are
//! frozen: later mutations are no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::clock::Clock;
use super::events::{EventBus, FlowEventKind};
use super::scheduler::{Scheduler, TimerKey};
use super::update_where;
use crate::catalog::AgentCatalog;
use crate::config::DelayRange;
use crate::error::FlowError;
use crate::new_id;

/// Status of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// One step of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStep {
    pub id: String,
    pub label: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<String>,
}

/// One execution attempt of an agent against a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub agent_type: String,
    pub task: String,
    pub steps: Vec<RunStep>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
}

impl AgentRun {
    /// Index of the step that should run next
    pub fn next_step(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| matches!(s.status, StepStatus::Pending | StepStatus::Running))
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    fn all_steps_completed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }
}

/// Serializable run history
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Most recent first
    pub runs: Vec<AgentRun>,
    /// Start time of the latest run per agent type
    pub last_run_at: BTreeMap<String, DateTime<Utc>>,
}

struct RunInner {
    catalog: Arc<AgentCatalog>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    events: EventBus,
    step_delay: DelayRange,
    state: Mutex<RunSnapshot>,
}

/// Owner of every `AgentRun`
#[derive(Clone)]
pub struct RunEngine {
    inner: Arc<RunInner>,
}

impl RunEngine {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        events: EventBus,
        step_delay: DelayRange,
    ) -> Self {
        Self {
            inner: Arc::new(RunInner {
                catalog,
                clock,
                scheduler,
                events,
                step_delay,
                state: Mutex::new(RunSnapshot::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunSnapshot> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate one non-terminal run under the lock and publish the result.
    /// `f` returns false to signal "nothing changed".
    fn mutate(&self, run_id: &str, f: impl FnOnce(&mut AgentRun, DateTime<Utc>) -> bool) -> Option<AgentRun> {
        self.mutate_any(run_id, |run, now| !run.status.is_terminal() && f(run, now))
    }

    /// `mutate` without the terminal freeze
    fn mutate_any(&self, run_id: &str, f: impl FnOnce(&mut AgentRun, DateTime<Utc>) -> bool) -> Option<AgentRun> {
        let now = self.inner.clock.now();
        let updated = update_where(&mut self.state().runs, |r| r.id == run_id, |r| f(r, now))?;
        self.inner.events.publish(FlowEventKind::RunUpdated {
            run: updated.clone(),
        });
        Some(updated)
    }

    /// Start a run of `agent_type` and arm its first step
    pub fn start_agent(&self, agent_type: &str, task: &str) -> Result<AgentRun, FlowError> {
        let agent = self
            .inner
            .catalog
            .get(agent_type)
            .ok_or_else(|| FlowError::UnknownAgent(agent_type.to_string()))?;

        let now = self.inner.clock.now();
        let run = AgentRun {
            id: new_id(),
            agent_type: agent.id.clone(),
            task: task.to_string(),
            steps: agent
                .default_steps
                .iter()
                .enumerate()
                .map(|(i, step)| RunStep {
                    id: format!("step-{}", i + 1),
                    label: step.label.clone(),
                    description: format!("{} for: {}", step.label, task),
                    status: StepStatus::Pending,
                    output: None,
                })
                .collect(),
            status: RunStatus::Running,
            started_at: now,
            completed_at: None,
            result: None,
        };

        {
            let mut state = self.state();
            state.last_run_at.insert(run.agent_type.clone(), now);
            state.runs.insert(0, run.clone());
        }
        tracing::info!(run_id = %run.id, steps = run.steps.len(), "Run started");
        self.inner
            .events
            .publish(FlowEventKind::RunUpdated { run: run.clone() });

        Ok(self.arm_next_step(&run.id).unwrap_or(run))
    }

    /// Set a step's status (and output, when given). Completing the last
    /// outstanding step completes the run in the same critical section.
    pub fn update_run_step(
        &self,
        run_id: &str,
        index: usize,
        status: StepStatus,
        output: Option<String>,
    ) -> Option<AgentRun> {
        self.mutate(run_id, |run, now| {
            let Some(step) = run.steps.get_mut(index) else {
                return false;
            };
            step.status = status;
            if output.is_some() {
                step.output = output;
            }
            if status == StepStatus::Completed && run.all_steps_completed() {
                run.finish(RunStatus::Completed, now);
                tracing::info!(run_id = %run.id, "Run completed");
            }
            true
        })
    }

    /// Move `from` -> `to`; any other status is left alone
    fn flip(&self, run_id: &str, from: RunStatus, to: RunStatus) -> Option<AgentRun> {
        self.mutate(run_id, |run, _| {
            let matched = run.status == from;
            if matched {
                run.status = to;
            }
            matched
        })
    }

    pub fn pause_run(&self, run_id: &str) -> Option<AgentRun> {
        let run = self.flip(run_id, RunStatus::Running, RunStatus::Paused)?;
        self.inner.scheduler.revoke_unit(run_id);
        tracing::info!(run_id = %run_id, "Run paused");
        Some(run)
    }

    /// Resume a paused run from its first unfinished step
    pub fn resume_run(&self, run_id: &str) -> Option<AgentRun> {
        let run = self.flip(run_id, RunStatus::Paused, RunStatus::Running)?;
        tracing::info!(run_id = %run_id, "Run resumed");
        Some(self.arm_next_step(run_id).unwrap_or(run))
    }

    pub fn cancel_run(&self, run_id: &str) -> Option<AgentRun> {
        self.force_terminal(run_id, RunStatus::Cancelled)
    }

    pub fn complete_run(&self, run_id: &str) -> Option<AgentRun> {
        self.force_terminal(run_id, RunStatus::Completed)
    }

    pub fn fail_run(&self, run_id: &str) -> Option<AgentRun> {
        self.force_terminal(run_id, RunStatus::Failed)
    }

    fn force_terminal(&self, run_id: &str, status: RunStatus) -> Option<AgentRun> {
        let run = self.mutate(run_id, |run, now| {
            run.finish(status, now);
            true
        })?;
        self.inner.scheduler.revoke_unit(run_id);
        tracing::info!(run_id = %run_id, status = ?status, "Run finished");
        Some(run)
    }

    /// Attach a final summary. Allowed on completed runs too.
    pub fn set_run_result(&self, run_id: &str, text: &str) -> Option<AgentRun> {
        self.mutate_any(run_id, |run, _| {
            run.result = Some(text.to_string());
            true
        })
    }

    /// Mark the next unfinished step running and schedule its completion
    fn arm_next_step(&self, run_id: &str) -> Option<AgentRun> {
        let mut index = None;
        let run = self.mutate(run_id, |run, _| {
            if run.status != RunStatus::Running {
                return false;
            }
            let Some(i) = run.next_step() else {
                return false;
            };
            run.steps[i].status = StepStatus::Running;
            index = Some(i);
            true
        })?;
        let index = index?;

        let engine = self.clone();
        let id = run_id.to_string();
        self.inner.scheduler.schedule(
            TimerKey::new(run_id, index),
            self.inner.step_delay,
            move || engine.on_step_elapsed(&id, index),
        );
        Some(run)
    }

    /// Timer callback: finish the step, then either arm the next one or
    /// record the run's result
    fn on_step_elapsed(&self, run_id: &str, index: usize) {
        let catalog = Arc::clone(&self.inner.catalog);
        let updated = self.mutate(run_id, |run, now| {
            if run.status != RunStatus::Running {
                return false;
            }
            let Some(step) = run.steps.get_mut(index) else {
                return false;
            };
            step.status = StepStatus::Completed;
            step.output = Some(format!("{} finished", step.label));

            if run.all_steps_completed() {
                run.finish(RunStatus::Completed, now);
                run.result = Some(format!(
                    "{} completed {} steps for: {}",
                    catalog.label_of(&run.agent_type),
                    run.steps.len(),
                    run.task
                ));
            }
            true
        });

        match updated {
            Some(run) if run.status == RunStatus::Completed => {
                tracing::info!(run_id = %run_id, "Run completed");
            }
            Some(_) => {
                self.arm_next_step(run_id);
            }
            None => {}
        }
    }

    // === Queries ===

    /// Run history, most recent first
    pub fn runs(&self) -> Vec<AgentRun> {
        self.state().runs.clone()
    }

    pub fn run(&self, run_id: &str) -> Option<AgentRun> {
        self.state().runs.iter().find(|r| r.id == run_id).cloned()
    }

    pub fn active_runs(&self) -> Vec<AgentRun> {
        self.state()
            .runs
            .iter()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn last_run_at(&self, agent_type: &str) -> Option<DateTime<Utc>> {
        self.state().last_run_at.get(agent_type).copied()
    }

    /// Drop terminal runs from history
    pub fn clear_history(&self) -> usize {
        let removed = {
            let mut state = self.state();
            let before = state.runs.len();
            state.runs.retain(|r| !r.status.is_terminal());
            before - state.runs.len()
        };
        if removed > 0 {
            self.inner
                .events
                .publish(FlowEventKind::RunsPruned { removed });
        }
        removed
    }

    // === Persistence ===

    pub fn snapshot(&self) -> RunSnapshot {
        self.state().clone()
    }

    /// Replace all runs. Runs that were `Running` come back `Paused`, since
    /// their timers did not survive.
    pub fn restore(&self, mut snapshot: RunSnapshot) {
        for run in &mut snapshot.runs {
            if run.status == RunStatus::Running {
                run.status = RunStatus::Paused;
            }
        }
        let previous = std::mem::replace(&mut *self.state(), snapshot);
        for run in previous.runs.iter().filter(|r| !r.status.is_terminal()) {
            self.inner.scheduler.revoke_unit(&run.id);
        }
        tracing::info!(runs = self.state().runs.len(), "Run history restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STEP_DELAY;
    use crate::engine::clock::{FixedDelay, RandomDelay, SystemClock};
    use std::time::Duration;

    fn engine_with(delays: Arc<dyn crate::engine::clock::DelayGenerator>) -> (RunEngine, Scheduler) {
        let scheduler = Scheduler::new(delays);
        let engine = RunEngine::new(
            Arc::new(AgentCatalog::default()),
            Arc::new(SystemClock),
            scheduler.clone(),
            EventBus::default(),
            STEP_DELAY,
        );
        (engine, scheduler)
    }

    fn engine() -> (RunEngine, Scheduler) {
        engine_with(Arc::new(RandomDelay))
    }

    async fn wait_for(engine: &RunEngine, run_id: &str, status: RunStatus) -> AgentRun {
        for _ in 0..100 {
            let run = engine.run(run_id).unwrap();
            if run.status == status {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("run never reached {:?}", status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_synthesizes_steps() {
        let (engine, scheduler) = engine();
        let run = engine.start_agent("writer", "Launch post").unwrap();

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.steps.len(), 3);
        assert_eq!(run.steps[0].status, StepStatus::Running);
        assert_eq!(run.steps[1].status, StepStatus::Pending);
        assert_eq!(run.steps[0].description, "Outlining structure for: Launch post");
        assert!(run.completed_at.is_none());
        assert_eq!(engine.last_run_at("writer"), Some(run.started_at));
        assert!(scheduler.is_pending(&TimerKey::new(&run.id, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_most_recent_first() {
        let (engine, _) = engine();
        let first = engine.start_agent("writer", "a").unwrap();
        let second = engine.start_agent("coder", "b").unwrap();

        let ids: Vec<String> = engine.runs().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_agent_rejected() {
        let (engine, _) = engine();
        let err = engine.start_agent("poet", "a sonnet").unwrap_err();
        assert!(matches!(err, FlowError::UnknownAgent(_)));
        assert!(engine.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_progresses_to_completion() {
        let (engine, _) = engine();
        let run = engine.start_agent("reviewer", "Check the draft").unwrap();

        let done = wait_for(&engine, &run.id, RunStatus::Completed).await;
        assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(done.steps[2].output.as_deref(), Some("Writing feedback finished"));
        assert!(done.completed_at.is_some());
        assert_eq!(
            done.result.as_deref(),
            Some("Reviewer completed 3 steps for: Check the draft")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_completion_in_any_order() {
        let (engine, _) = engine();
        let run = engine.start_agent("writer", "x").unwrap();
        engine.pause_run(&run.id);

        for i in [2, 0, 1] {
            engine.update_run_step(&run.id, i, StepStatus::Completed, None);
        }

        let run = engine.run(&run.id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_preserves_completed_steps() {
        let (engine, scheduler) = engine_with(Arc::new(FixedDelay(Duration::from_secs(1))));
        let run = engine.start_agent("analyst", "Quarterly numbers").unwrap();

        // Two of five steps finish, the third is in flight
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let paused = engine.pause_run(&run.id).unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        assert_eq!(paused.completed_steps(), 2);
        assert_eq!(scheduler.pending_for(&run.id), 0);

        // Nothing moves while paused
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.run(&run.id).unwrap().completed_steps(), 2);

        let resumed = engine.resume_run(&run.id).unwrap();
        assert_eq!(resumed.status, RunStatus::Running);
        assert_eq!(resumed.completed_steps(), 2);
        assert_eq!(resumed.steps[2].status, StepStatus::Running);
        assert!(scheduler.is_pending(&TimerKey::new(&run.id, 2)));

        let done = wait_for(&engine, &run.id, RunStatus::Completed).await;
        assert_eq!(done.completed_steps(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_final() {
        let (engine, scheduler) = engine();
        let run = engine.start_agent("coder", "Refactor").unwrap();

        let cancelled = engine.cancel_run(&run.id).unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(engine.cancel_run(&run.id).is_none());
        assert_eq!(engine.run(&run.id).unwrap(), cancelled);
        assert_eq!(scheduler.pending_for(&run.id), 0);

        // Terminal runs ignore everything else
        assert!(engine.resume_run(&run.id).is_none());
        assert!(engine.fail_run(&run.id).is_none());
        assert!(engine
            .update_run_step(&run.id, 0, StepStatus::Completed, None)
            .is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(engine.run(&run.id).unwrap(), cancelled);

        // A summary can still be attached after the fact
        let summarized = engine.set_run_result(&run.id, "Partial refactor").unwrap();
        assert_eq!(summarized.status, RunStatus::Cancelled);
        assert_eq!(summarized.result.as_deref(), Some("Partial refactor"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_run_ids_are_noops() {
        let (engine, _) = engine();
        assert!(engine.pause_run("missing").is_none());
        assert!(engine.cancel_run("missing").is_none());
        assert!(engine.set_run_result("missing", "x").is_none());
        assert!(engine
            .update_run_step("missing", 0, StepStatus::Completed, None)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_step_is_noop() {
        let (engine, _) = engine();
        let run = engine.start_agent("writer", "x").unwrap();
        assert!(engine
            .update_run_step(&run.id, 99, StepStatus::Completed, None)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history_keeps_active_runs() {
        let (engine, _) = engine();
        let keep = engine.start_agent("writer", "a").unwrap();
        let drop = engine.start_agent("writer", "b").unwrap();
        engine.fail_run(&drop.id);

        assert_eq!(engine.clear_history(), 1);
        assert_eq!(engine.runs().len(), 1);
        assert_eq!(engine.active_runs()[0].id, keep.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_pauses_running_runs() {
        let (engine, _) = engine();
        let run = engine.start_agent("writer", "a").unwrap();
        let snapshot = engine.snapshot();

        let (fresh, _) = engine_with(Arc::new(FixedDelay::zero()));
        fresh.restore(snapshot);

        let restored = fresh.run(&run.id).unwrap();
        assert_eq!(restored.status, RunStatus::Paused);
        assert!(fresh.last_run_at("writer").is_some());

        fresh.resume_run(&run.id);
        wait_for(&fresh, &run.id, RunStatus::Completed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_mutation_is_published() {
        let scheduler = Scheduler::new(Arc::new(RandomDelay));
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let engine = RunEngine::new(
            Arc::new(AgentCatalog::default()),
            Arc::new(SystemClock),
            scheduler,
            events,
            STEP_DELAY,
        );

        let run = engine.start_agent("writer", "x").unwrap();
        engine.pause_run(&run.id);

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FlowEventKind::RunUpdated { run } = event.kind {
                statuses.push(run.status);
            }
        }
        assert_eq!(
            statuses,
            vec![RunStatus::Running, RunStatus::Running, RunStatus::Paused]
        );
    }
}
