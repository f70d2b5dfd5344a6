//! Folding stages and the run's own state into a run summary.

use tracing::debug;

use super::links::LinkBuilder;
use super::summary::RunSummary;
use crate::core::Status;
use crate::extract::ExecutionStages;
use crate::graph::{RunId, RunTerminalState};

/// Derives run-level status and timing.
#[derive(Debug, Clone, Default)]
pub struct RunAggregator {
    links: LinkBuilder,
}

impl RunAggregator {
    /// Creates an aggregator that links below `links`.
    #[must_use]
    pub const fn new(links: LinkBuilder) -> Self {
        Self { links }
    }

    /// The link builder in use.
    #[must_use]
    pub const fn links(&self) -> &LinkBuilder {
        &self.links
    }

    /// Builds the summary of `run`.
    ///
    /// A finished run reports its recorded result, worsened by any override
    /// in the graph, and its still-open stages inherit that result and close. A running
    /// run reports `InProgress`, or `PausedPendingInput` if a stage waits on
    /// input. Timing comes from the whole graph, never from summing stages.
    #[must_use]
    pub fn aggregate(
        &self,
        run: &RunId,
        execution: &ExecutionStages,
        state: &RunTerminalState,
    ) -> RunSummary {
        let mut stages = execution.stages.clone();

        let status = match state.status {
            Some(recorded) => {
                let status = execution
                    .forced
                    .map_or(recorded, |forced| recorded.merge(forced));
                for stage in stages.iter_mut().filter(|s| s.open) {
                    stage.status = status;
                    stage.open = false;
                }
                status
            }
            None => stages
                .iter()
                .map(|s| s.status)
                .fold(Status::InProgress, Status::merge),
        };

        for stage in &mut stages {
            stage.links.self_href = self.links.stage(run, stage.id);
        }

        let span = execution.span;
        debug!(
            run = %run,
            execution = %execution.execution,
            status = %status,
            stages = stages.len(),
            "Aggregated run"
        );

        RunSummary {
            id: run.clone(),
            name: run.display_name(),
            status,
            start_time_millis: span.start_millis,
            end_time_millis: span.end_millis,
            duration_millis: span.active_millis(),
            pause_duration_millis: span.pause_millis,
            stages,
            links: self.links.run(run),
        }
    }
}
