//! The stage extraction walk.
//!
//! One pass over the arena in creation order assigns every node to at most
//! one stage: the innermost enclosing stage block, or else the most recent
//! flat stage marker. Nodes before the first stage belong to no stage.
//! A second pass folds errors and overrides into per-stage statuses, and
//! the timing of each stage is resolved from its members.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::{Status, StatusAccumulator, StatusEvent, TimeSpan};
use crate::graph::{ExecutionId, FlowGraph, NodeError, NodeKind, RunTerminalState};
use crate::utils::iso_from_millis;

use super::stage::{ExecutionStages, Stage, StageLinks};

/// Run-level facts the walk needs besides the graph itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionContext {
    /// Current time, used for anything still running.
    pub now_millis: i64,
    /// Recorded start of the run.
    pub run_start_millis: i64,
    /// Recorded end of the run, once finished.
    pub run_end_millis: Option<i64>,
    /// Whether the run has a final result.
    pub run_complete: bool,
}

impl ExtractionContext {
    /// Context for a run that is still executing.
    #[must_use]
    pub const fn running(run_start_millis: i64, now_millis: i64) -> Self {
        Self {
            now_millis,
            run_start_millis,
            run_end_millis: None,
            run_complete: false,
        }
    }

    /// Context for a finished run.
    #[must_use]
    pub const fn finished(run_start_millis: i64, run_end_millis: i64, now_millis: i64) -> Self {
        Self {
            now_millis,
            run_start_millis,
            run_end_millis: Some(run_end_millis),
            run_complete: true,
        }
    }

    /// Context for a run in whatever state the graph source reports.
    #[must_use]
    pub const fn for_run(state: &RunTerminalState, now_millis: i64) -> Self {
        Self {
            now_millis,
            run_start_millis: state.start_millis,
            run_end_millis: state.end_millis,
            run_complete: state.is_complete(),
        }
    }
}

#[derive(Debug)]
struct StageSlot {
    start: usize,
    name: String,
    members: Vec<usize>,
    end: Option<usize>,
    closed_by_marker: Option<usize>,
    acc: StatusAccumulator,
}

impl StageSlot {
    fn new(start: usize, name: &str) -> Self {
        Self {
            start,
            name: name.to_string(),
            members: vec![start],
            end: None,
            closed_by_marker: None,
            acc: StatusAccumulator::new(),
        }
    }

    const fn is_open(&self) -> bool {
        self.end.is_none() && self.closed_by_marker.is_none()
    }
}

/// Partitions an execution graph into stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageExtractor;

impl StageExtractor {
    /// Creates an extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Walks `graph` and derives its stages.
    ///
    /// Never fails: structural anomalies are logged and absorbed.
    #[must_use]
    pub fn extract(
        &self,
        execution: ExecutionId,
        graph: &FlowGraph,
        ctx: &ExtractionContext,
    ) -> ExecutionStages {
        let (mut slots, stage_of) = assign_stages(graph);
        let uncaught = uncaught_errors(graph, &slots);

        let mut run_acc = StatusAccumulator::new();
        let mut opened = 0;
        for idx in 0..graph.len() {
            // Stages are opened in creation order, so the slots opened so far
            // are exactly those whose start is at or before idx.
            while opened < slots.len() && slots[opened].start <= idx {
                if let Some(forced) = run_acc.forced() {
                    slots[opened].acc.apply(StatusEvent::Override(forced));
                }
                opened += 1;
            }

            let node = graph.node(idx);
            if uncaught[idx] {
                if let (Some(slot), Some(error)) = (stage_of[idx], &node.error) {
                    slots[slot].acc.apply(StatusEvent::Error(error.severity));
                }
            }
            if let Some(status) = node.result_override {
                run_acc.apply(StatusEvent::Override(status));
                for slot in &mut slots[..opened] {
                    slot.acc.apply(StatusEvent::Override(status));
                }
            }
        }

        let timing = TimingResolver { graph, ctx };
        let mut stages = Vec::with_capacity(slots.len());
        for slot in &slots {
            stages.push(build_stage(graph, ctx, &timing, slot, &uncaught));
        }

        let span = timing.graph_span();
        debug!(
            execution = %execution,
            nodes = graph.len(),
            stages = stages.len(),
            start = %iso_from_millis(span.start_millis),
            "Extracted stages"
        );

        ExecutionStages {
            execution,
            stages,
            span,
            forced: run_acc.forced(),
            complete: ctx.run_complete,
            node_count: graph.len(),
            anomaly_count: graph.anomalies().len(),
        }
    }
}

/// First pass: opens stages and maps each node to its stage slot.
fn assign_stages(graph: &FlowGraph) -> (Vec<StageSlot>, Vec<Option<usize>>) {
    let mut slots: Vec<StageSlot> = Vec::new();
    let mut stage_of = vec![None; graph.len()];
    let mut block_stage: HashMap<usize, usize> = HashMap::new();
    let mut marker: Option<usize> = None;

    for idx in 0..graph.len() {
        let node = graph.node(idx);
        let slot = match &node.kind {
            NodeKind::BlockStart { stage: Some(name) } => {
                slots.push(StageSlot::new(idx, name));
                let slot = slots.len() - 1;
                block_stage.insert(idx, slot);
                Some(slot)
            }
            NodeKind::StageMarker { name } => {
                if let Some(prev) = marker {
                    slots[prev].closed_by_marker = Some(idx);
                }
                slots.push(StageSlot::new(idx, name));
                let slot = slots.len() - 1;
                marker = Some(slot);
                Some(slot)
            }
            NodeKind::BlockEnd { start } if graph.is_matched_end(idx) => {
                let closed = graph
                    .index_of(*start)
                    .and_then(|s| block_stage.get(&s).copied());
                if let Some(slot) = closed {
                    slots[slot].end = Some(idx);
                    slots[slot].members.push(idx);
                    stage_of[idx] = Some(slot);
                    continue;
                }
                enclosing_stage(graph, idx, &block_stage).or(marker)
            }
            _ => enclosing_stage(graph, idx, &block_stage).or(marker),
        };

        if let Some(slot) = slot {
            if slots[slot].start != idx {
                slots[slot].members.push(idx);
            }
            stage_of[idx] = Some(slot);
        }
    }

    (slots, stage_of)
}

fn enclosing_stage(
    graph: &FlowGraph,
    idx: usize,
    block_stage: &HashMap<usize, usize>,
) -> Option<usize> {
    graph
        .enclosing_blocks(idx)
        .find_map(|block| block_stage.get(&block).copied())
}

/// Marks the errors that count toward a stage's status.
///
/// An error is caught when a later member of the same stage completed
/// without one. Errors outside every stage are never promoted here.
fn uncaught_errors(graph: &FlowGraph, slots: &[StageSlot]) -> Vec<bool> {
    let mut uncaught = vec![false; graph.len()];
    for slot in slots {
        let last_clean = slot
            .members
            .iter()
            .rposition(|&m| graph.node(m).error.is_none());
        let tail = last_clean.map_or(0, |pos| pos + 1);
        for &member in &slot.members[tail..] {
            uncaught[member] = graph.node(member).error.is_some();
        }
    }
    uncaught
}

fn build_stage(
    graph: &FlowGraph,
    ctx: &ExtractionContext,
    timing: &TimingResolver<'_>,
    slot: &StageSlot,
    uncaught: &[bool],
) -> Stage {
    let open = slot.is_open();
    let status = if open && !ctx.run_complete {
        let waiting = slot.members.iter().any(|&m| graph.node(m).awaiting_input);
        if waiting {
            Status::PausedPendingInput
        } else {
            Status::InProgress
        }
    } else {
        slot.acc.resolve()
    };

    let error = if status.is_failure() {
        most_severe_error(graph, slot, uncaught)
    } else {
        None
    };

    let span = timing.stage_span(slot);
    Stage {
        id: graph.node(slot.start).id,
        name: slot.name.clone(),
        status,
        start_time_millis: span.start_millis,
        duration_millis: span.active_millis(),
        pause_duration_millis: span.pause_millis,
        member_ids: slot.members.iter().map(|&m| graph.node(m).id).collect(),
        end_node: slot.end.map(|e| graph.node(e).id),
        open,
        error,
        links: StageLinks::default(),
    }
}

fn most_severe_error(graph: &FlowGraph, slot: &StageSlot, uncaught: &[bool]) -> Option<NodeError> {
    slot.members
        .iter()
        .filter(|&&m| uncaught[m])
        .filter_map(|&m| graph.node(m).error.as_ref())
        .fold(None, |best: Option<&NodeError>, e| match best {
            Some(b) if b.severity >= e.severity => Some(b),
            _ => Some(e),
        })
        .cloned()
}

/// Resolves node and stage times, with the documented fallbacks.
struct TimingResolver<'a> {
    graph: &'a FlowGraph,
    ctx: &'a ExtractionContext,
}

impl TimingResolver<'_> {
    /// End of a node: its own duration, else the next timed node's start,
    /// else the run's recorded end, else now.
    fn node_end(&self, idx: usize) -> i64 {
        let node = self.graph.node(idx);
        node.timing
            .and_then(|t| t.end_millis())
            .or_else(|| self.graph.next_timed_start(idx))
            .or(self.ctx.run_end_millis)
            .unwrap_or(self.ctx.now_millis)
    }

    /// Start of a node, or of the next timed node if it has none.
    fn node_start(&self, idx: usize) -> Option<i64> {
        self.graph
            .node(idx)
            .timing
            .map(|t| t.start_millis)
            .or_else(|| self.graph.next_timed_start(idx))
    }

    fn warn_untimed(&self, idx: usize) {
        let last = self.graph.len().saturating_sub(1);
        let node = self.graph.node(idx);
        if node.timing.is_none() && idx != last {
            warn!(node = %node.id, "Node has no timing information");
        }
    }

    fn stage_span(&self, slot: &StageSlot) -> TimeSpan {
        for &m in &slot.members {
            self.warn_untimed(m);
        }

        let start = slot
            .members
            .iter()
            .find_map(|&m| self.graph.node(m).timing.map(|t| t.start_millis))
            .unwrap_or(self.ctx.run_start_millis);

        let end = match (slot.end, slot.closed_by_marker) {
            (Some(end), _) => self.node_end(end),
            (None, Some(next)) => self
                .node_start(next)
                .unwrap_or_else(|| self.last_member_end(slot)),
            (None, None) if self.ctx.run_complete => self.last_member_end(slot),
            (None, None) => self.ctx.now_millis,
        };

        let pause = slot
            .members
            .iter()
            .map(|&m| self.graph.node(m).pause())
            .sum();

        TimeSpan::new(start, end, pause)
    }

    fn last_member_end(&self, slot: &StageSlot) -> i64 {
        slot.members
            .last()
            .map_or(self.ctx.now_millis, |&m| self.node_end(m))
    }

    fn graph_span(&self) -> TimeSpan {
        let start = self
            .graph
            .nodes()
            .iter()
            .find_map(|n| n.timing.map(|t| t.start_millis))
            .unwrap_or(self.ctx.run_start_millis);

        let end = if self.graph.is_empty() {
            self.ctx.run_end_millis.unwrap_or(self.ctx.now_millis)
        } else if self.ctx.run_complete {
            self.node_end(self.graph.len() - 1)
        } else {
            self.ctx.now_millis
        };

        let pause = self.graph.nodes().iter().map(|n| n.pause()).sum();
        TimeSpan::new(start, end, pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeTiming;
    use crate::graph::{ExecutionNode, NodeId};
    use crate::testing::{Branch, FlowScript};
    use pretty_assertions::assert_eq;

    fn extract(graph: &FlowGraph, ctx: &ExtractionContext) -> ExecutionStages {
        StageExtractor::new().extract(ExecutionId::new(), graph, ctx)
    }

    #[test]
    fn test_one_stage_per_boundary_pair() {
        let script = FlowScript::new(1_000)
            .step("checkout")
            .stage("Build", |s| s.step("compile").step("package"))
            .step("between")
            .stage("Test", |s| s.step("unit").step("it"))
            .stage("Deploy", |s| s.step("ship"))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stage_names(), vec!["Build", "Test", "Deploy"]);
        assert_eq!(
            result.statuses(),
            vec![Status::Success, Status::Success, Status::Success]
        );
        assert!(result.stages.iter().all(|s| !s.open));
        assert!(result.stages.iter().all(|s| s.duration_millis > 0));
    }

    #[test]
    fn test_pre_stage_nodes_are_excluded() {
        let script = FlowScript::new(0)
            .step("setup")
            .step("more setup")
            .stage("Only", |s| s.step("work"))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stages.len(), 1);
        let members = &result.stages[0].member_ids;
        let setup = script.id_of("setup");
        assert!(!members.contains(&setup));
        assert!(members.contains(&script.id_of("work")));
    }

    #[test]
    fn test_parallel_branches_stay_inside_their_stage() {
        let script = FlowScript::new(0)
            .stage("Test", |s| {
                s.parallel(vec![
                    Branch::new("unit", |b| b.step("unit-1").step("unit-2")),
                    Branch::new("browser", |b| b.step("chrome")),
                ])
            })
            .stage("Deploy", |s| s.step("ship"))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stage_names(), vec!["Test", "Deploy"]);
        let test = &result.stages[0];
        for name in ["unit-1", "unit-2", "chrome"] {
            assert!(test.member_ids.contains(&script.id_of(name)), "{name}");
        }
        assert!(!result.stages[1].member_ids.contains(&script.id_of("chrome")));
    }

    #[test]
    fn test_stage_inside_parallel_branch_is_its_own_stage() {
        let script = FlowScript::new(0)
            .parallel(vec![
                Branch::new("a", |b| b.stage("Lint", |s| s.step("lint"))),
                Branch::new("b", |b| b.stage("Docs", |s| s.step("docs"))),
            ])
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stage_names(), vec!["Lint", "Docs"]);
        assert!(result.stages[0].member_ids.contains(&script.id_of("lint")));
        assert!(!result.stages[0].member_ids.contains(&script.id_of("docs")));
    }

    #[test]
    fn test_caught_error_does_not_fail_stage() {
        let script = FlowScript::new(0)
            .stage("Game of Thrones", |s| {
                s.failing_step("error", "Trusted Grand Maester Pycelle")
                    .step("echo")
            })
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stages[0].status, Status::Success);
        assert_eq!(result.stages[0].error, None);
    }

    #[test]
    fn test_uncaught_error_fails_stage() {
        let script = FlowScript::new(0)
            .stage("Build", |s| s.step("compile"))
            .stage("Test", |s| s.step("echo").failing_step("sh", "exit 1"))
            .finish_with(Status::Failed);

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.statuses(), vec![Status::Success, Status::Failed]);
        let error = result.stages[1].error.as_ref().map(|e| e.message.as_str());
        assert_eq!(error, Some("exit 1"));
    }

    #[test]
    fn test_error_recovered_by_later_stage_still_fails_its_stage() {
        let script = FlowScript::new(0)
            .stage("Flaky", |s| s.failing_step("sh", "boom"))
            .stage("Recover", |s| s.step("echo"))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.statuses(), vec![Status::Failed, Status::Success]);
    }

    #[test]
    fn test_override_applies_to_earlier_and_later_stages() {
        let script = FlowScript::new(0)
            .marker("first")
            .step("works")
            .marker("second")
            .override_result(Status::Unstable)
            .step("ran things")
            .marker("end")
            .step("done")
            .finish_with(Status::Unstable);

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.forced, Some(Status::Unstable));
        assert_eq!(
            result.statuses(),
            vec![Status::Unstable, Status::Unstable, Status::Unstable]
        );
    }

    #[test]
    fn test_error_after_override_still_counts() {
        let script = FlowScript::new(0)
            .override_result(Status::Unstable)
            .stage("Build", |s| s.failing_step("sh", "exit 2"))
            .finish_with(Status::Failed);

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stages[0].status, Status::Failed);
    }

    #[test]
    fn test_legacy_markers_partition_flat_graph() {
        let script = FlowScript::new(0)
            .step("pre")
            .marker("Build")
            .step("echo building")
            .marker("Test")
            .step("echo testing")
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stage_names(), vec!["Build", "Test"]);
        assert!(!result.stages[0].open);
        // the last marker stage stays open until the run ends
        assert!(result.stages[1].open);
        assert_eq!(result.stages[1].status, Status::Success);
        assert!(result.stages[1].member_ids.contains(&script.id_of("echo testing")));
    }

    #[test]
    fn test_open_stage_of_running_execution() {
        let script = FlowScript::new(0)
            .stage("Build", |s| s.step("compile"))
            .open_stage("Test")
            .step("unit");

        let ctx = script.running_context();
        let result = extract(&script.graph(), &ctx);
        assert_eq!(result.statuses(), vec![Status::Success, Status::InProgress]);
        let test = &result.stages[1];
        assert!(test.open);
        assert_eq!(
            test.duration_millis,
            ctx.now_millis - test.start_time_millis
        );
    }

    #[test]
    fn test_stage_awaiting_input_is_paused() {
        let script = FlowScript::new(0)
            .open_stage("Approve")
            .input_step("input", 5_000);

        let result = extract(&script.graph(), &script.running_context());
        let stage = &result.stages[0];
        assert_eq!(stage.status, Status::PausedPendingInput);
        assert_eq!(stage.pause_duration_millis, 5_000);
    }

    #[test]
    fn test_pause_is_excluded_from_duration() {
        let script = FlowScript::new(0)
            .stage("Approve", |s| s.paused_step("input", 2_000))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        let stage = &result.stages[0];
        assert_eq!(stage.pause_duration_millis, 2_000);
        let wall = stage.end_time_millis() - stage.start_time_millis;
        assert_eq!(stage.duration_millis, wall - 2_000);
    }

    #[test]
    fn test_no_pause_is_exactly_zero() {
        let script = FlowScript::new(0)
            .stage("Build", |s| s.step("compile"))
            .finish();

        let result = extract(&script.graph(), &script.finished_context());
        assert_eq!(result.stages[0].pause_duration_millis, 0);
        assert_eq!(result.span.pause_millis, 0);
    }

    #[test]
    fn test_missing_terminal_timing_falls_back_to_run_end() {
        let script = FlowScript::new(1_000)
            .marker("Build")
            .step("echo")
            .finish();
        let mut nodes = script.nodes().to_vec();
        let before = extract(&FlowGraph::from_nodes(nodes.clone()), &script.finished_context());

        if let Some(last) = nodes.last_mut() {
            last.timing = None;
        }
        let ctx = ExtractionContext::finished(1_000, 99_000, 200_000);
        let after = extract(&FlowGraph::from_nodes(nodes), &ctx);

        assert_eq!(after.span.end_millis, 99_000);
        assert_eq!(after.stages[0].start_time_millis, before.stages[0].start_time_millis);
        assert_eq!(
            after.stages[0].end_time_millis(),
            99_000,
            "last stage ends at the recorded run end"
        );
    }

    #[test]
    fn test_missing_timing_does_not_poison_earlier_stages() {
        let script = FlowScript::new(0)
            .stage("Build", |s| s.step("compile"))
            .stage("Test", |s| s.step("unit"))
            .finish();
        let mut nodes = script.nodes().to_vec();
        let baseline = extract(&FlowGraph::from_nodes(nodes.clone()), &script.finished_context());

        if let Some(last) = nodes.last_mut() {
            last.timing = None;
        }
        let result = extract(&FlowGraph::from_nodes(nodes), &script.finished_context());
        assert_eq!(result.stages[0], baseline.stages[0]);
    }

    #[test]
    fn test_structural_anomalies_degrade_gracefully() {
        let nodes = vec![
            ExecutionNode::step(1).with_timing(NodeTiming::completed(0, 10)),
            ExecutionNode::new(
                2,
                NodeKind::BlockStart {
                    stage: Some("Build".into()),
                },
            )
            .with_parents([NodeId(1)])
            .with_timing(NodeTiming::started(10)),
            ExecutionNode::step(3)
                .with_parents([NodeId(77)])
                .with_timing(NodeTiming::completed(20, 10)),
            ExecutionNode::new(4, NodeKind::BlockEnd { start: NodeId(40) })
                .with_parents([NodeId(2)])
                .with_timing(NodeTiming::started(30)),
        ];

        let graph = FlowGraph::from_nodes(nodes);
        let result = extract(&graph, &ExtractionContext::running(0, 100));
        assert_eq!(result.anomaly_count, 2);
        assert_eq!(result.stage_names(), vec!["Build"]);
        assert!(result.stages[0].open);
        assert_eq!(result.stages[0].status, Status::InProgress);
    }

    #[test]
    fn test_context_follows_terminal_state() {
        let running = ExtractionContext::for_run(&RunTerminalState::running(10), 50);
        assert_eq!(running, ExtractionContext::running(10, 50));

        let done = RunTerminalState::finished(Status::Success, 10, 40);
        assert_eq!(
            ExtractionContext::for_run(&done, 50),
            ExtractionContext::finished(10, 40, 50)
        );
    }

    #[test]
    fn test_empty_graph() {
        let graph = FlowGraph::default();
        let result = extract(&graph, &ExtractionContext::finished(5, 50, 100));
        assert!(result.stages.is_empty());
        assert_eq!(result.span, TimeSpan::new(5, 50, 0));
    }
}
