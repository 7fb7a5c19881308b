//! # Execution Engine
//!
//! Simulated execution of runs, pipelines and canvas walks.
//!
//! ## Execution Flow
//!
//! ```text
//! start_agent ──▶ Scheduler (one timer per step) ──▶ RunUpdated
//!                                                      │
//! run_pipeline ──▶ Conductor ◀──────────────────────────┘
//!                     └──▶ advance_stage / fail_pipeline ──▶ PipelineUpdated
//!
//! execute ──▶ sequential node walk ──▶ CanvasUpdated ... ExecutionFinished
//! ```
//!
//! Every engine takes its collaborators (catalog, clock, scheduler, event
//! bus) at construction; `FlowEngine` assembles one complete set.

pub mod canvas;
pub mod clock;
pub mod conductor;
pub mod events;
pub mod flow;
pub mod pipeline;
pub mod run;
pub mod scheduler;

pub use canvas::{CanvasEngine, Execution, WalkReport, STOPPED_OUTPUT};
pub use clock::{Clock, DelayGenerator, FixedDelay, ManualClock, RandomDelay, SystemClock};
pub use conductor::Conductor;
pub use events::{EventBus, FlowEvent, FlowEventKind};
pub use flow::{CanvasPipeline, EngineParts, FlowEngine, Launch};
pub use pipeline::{
    AgentPipeline, PipelineEngine, PipelineSnapshot, PipelineStage, PipelineStatus, StageStatus,
};
pub use run::{AgentRun, RunEngine, RunSnapshot, RunStatus, RunStep, StepStatus};
pub use scheduler::{Scheduler, TimerHandle, TimerKey};

/// Apply `f` to the first item matching `pick`; clone it out when `f`
/// reports a change
pub(crate) fn update_where<T: Clone>(
    items: &mut [T],
    pick: impl Fn(&T) -> bool,
    f: impl FnOnce(&mut T) -> bool,
) -> Option<T> {
    let item = items.iter_mut().find(|item| pick(item))?;
    f(item).then(|| item.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_where_clones_only_changes() {
        let mut items = vec![(1, "idle"), (2, "idle")];

        let changed = update_where(&mut items, |i| i.0 == 2, |i| {
            i.1 = "busy";
            true
        });
        assert_eq!(changed, Some((2, "busy")));

        // Refused or missing
        assert_eq!(update_where(&mut items, |i| i.0 == 1, |_| false), None);
        assert_eq!(update_where(&mut items, |i| i.0 == 9, |_| true), None);
        assert_eq!(items, vec![(1, "idle"), (2, "busy")]);
    }
}
