//! Script-like builder for execution graphs.
//!
//! `FlowScript` records nodes the way a pipeline engine would while a script
//! runs: every node gets the next id, a start time a fixed step after the
//! previous one, and the previous node as parent. Block ends inherit an
//! error from the last node of their body, so an error that nothing caught
//! propagates outward just as it does in a real execution.

use std::collections::HashMap;

use crate::core::{NodeTiming, Status};
use crate::errors::Result;
use crate::extract::ExtractionContext;
use crate::graph::{
    ExecutionId, ExecutionNode, FlowGraph, InMemoryGraphSource, NodeError, NodeId, NodeKind,
    RunId, RunTerminalState,
};

/// Default spacing between consecutive nodes.
pub const DEFAULT_STEP_MILLIS: i64 = 100;

/// One branch of a parallel block.
pub struct Branch {
    name: String,
    body: Box<dyn FnOnce(FlowScript) -> FlowScript>,
}

impl Branch {
    /// Creates a branch whose body is recorded by `body`.
    pub fn new(name: impl Into<String>, body: impl FnOnce(FlowScript) -> FlowScript + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

/// Builds an execution graph step by step.
#[derive(Debug, Clone)]
pub struct FlowScript {
    nodes: Vec<ExecutionNode>,
    names: HashMap<String, NodeId>,
    next_id: u64,
    clock: i64,
    step_millis: i64,
    current: Option<NodeId>,
    open_blocks: Vec<NodeId>,
    run_start: i64,
    run_end: Option<i64>,
    result: Option<Status>,
}

impl FlowScript {
    /// Starts a script whose first node starts at `start_millis`.
    #[must_use]
    pub fn new(start_millis: i64) -> Self {
        let mut script = Self {
            nodes: Vec::new(),
            names: HashMap::new(),
            next_id: 2,
            clock: start_millis,
            step_millis: DEFAULT_STEP_MILLIS,
            current: None,
            open_blocks: Vec::new(),
            run_start: start_millis,
            run_end: None,
            result: None,
        };
        script.push(NodeKind::Step, "start", |n| n);
        script
    }

    /// Changes the spacing between subsequent nodes.
    #[must_use]
    pub const fn with_step_millis(mut self, step_millis: i64) -> Self {
        self.step_millis = step_millis;
        self
    }

    fn push<F>(&mut self, kind: NodeKind, name: &str, decorate: F) -> NodeId
    where
        F: FnOnce(ExecutionNode) -> ExecutionNode,
    {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let node = ExecutionNode::new(id, kind)
            .with_parents(self.current)
            .with_display_name(name)
            .with_timing(NodeTiming::started(self.clock));
        let node = decorate(node);

        self.clock += self.step_millis + node.pause();
        self.current = Some(id);
        self.names.insert(name.to_string(), id);
        self.nodes.push(node);
        id
    }

    fn last_error(&self) -> Option<NodeError> {
        self.nodes.last().and_then(|n| n.error.clone())
    }

    /// Records a plain step.
    #[must_use]
    pub fn step(mut self, name: &str) -> Self {
        self.push(NodeKind::Step, name, |n| n);
        self
    }

    /// Records a step that failed with `message`.
    #[must_use]
    pub fn failing_step(self, name: &str, message: &str) -> Self {
        self.erroring_step(name, NodeError::failure(message))
    }

    /// Records a step carrying `error`.
    #[must_use]
    pub fn erroring_step(mut self, name: &str, error: NodeError) -> Self {
        self.push(NodeKind::Step, name, |n| n.with_error(error));
        self
    }

    /// Records a step that waited `pause_millis` for input and then resumed.
    #[must_use]
    pub fn paused_step(mut self, name: &str, pause_millis: i64) -> Self {
        self.push(NodeKind::Step, name, |n| n.with_pause(pause_millis));
        self
    }

    /// Records a step that is still waiting for input.
    #[must_use]
    pub fn input_step(mut self, name: &str, paused_so_far: i64) -> Self {
        self.push(NodeKind::Step, name, |n| {
            n.with_pause(paused_so_far).awaiting_input()
        });
        self
    }

    /// Records an explicit result directive.
    #[must_use]
    pub fn override_result(mut self, status: Status) -> Self {
        let name = format!("result = {status}");
        self.push(NodeKind::Step, &name, |n| n.with_override(status));
        self
    }

    /// Records a flat stage marker.
    #[must_use]
    pub fn marker(mut self, name: &str) -> Self {
        self.push(
            NodeKind::StageMarker {
                name: name.to_string(),
            },
            name,
            |n| n,
        );
        self
    }

    /// Opens a stage block and leaves it open.
    #[must_use]
    pub fn open_stage(self, name: &str) -> Self {
        self.open(Some(name), name)
    }

    /// Opens a plain block and leaves it open.
    #[must_use]
    pub fn open_block(self, name: &str) -> Self {
        self.open(None, name)
    }

    fn open(mut self, stage: Option<&str>, name: &str) -> Self {
        let id = self.push(
            NodeKind::BlockStart {
                stage: stage.map(String::from),
            },
            name,
            |n| n,
        );
        self.open_blocks.push(id);
        self
    }

    /// Closes the innermost open block. Does nothing if none is open.
    #[must_use]
    pub fn close_block(mut self) -> Self {
        if let Some(start) = self.open_blocks.pop() {
            let error = self.last_error();
            let name = format!("end of {start}");
            self.push(NodeKind::BlockEnd { start }, &name, |n| match error {
                Some(e) => n.with_error(e),
                None => n,
            });
        }
        self
    }

    /// Records a complete stage block.
    #[must_use]
    pub fn stage<F>(self, name: &str, body: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        body(self.open_stage(name)).close_block()
    }

    /// Records a complete plain block, such as a `try` body.
    #[must_use]
    pub fn block<F>(self, name: &str, body: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        body(self.open_block(name)).close_block()
    }

    /// Records a parallel block. Branch bodies are recorded one after the
    /// other; the closing node merges every branch.
    #[must_use]
    pub fn parallel(self, branches: Vec<Branch>) -> Self {
        let mut script = self.open_block("parallel");
        let fork = script.current;
        let mut branch_ends = Vec::with_capacity(branches.len());
        let mut error = None;

        for branch in branches {
            script.current = fork;
            script = (branch.body)(script.open_block(&branch.name)).close_block();
            if error.is_none() {
                error = script.last_error();
            }
            branch_ends.extend(script.current);
        }

        if let Some(start) = script.open_blocks.pop() {
            script.push(NodeKind::BlockEnd { start }, "end of parallel", |n| {
                let n = n.with_parents(branch_ends);
                match error {
                    Some(e) => n.with_error(e),
                    None => n,
                }
            });
        }
        script
    }

    /// Ends the script with a successful run.
    #[must_use]
    pub fn finish(self) -> Self {
        self.finish_with(Status::Success)
    }

    /// Closes open blocks, records the end node and the run's result.
    #[must_use]
    pub fn finish_with(mut self, result: Status) -> Self {
        while !self.open_blocks.is_empty() {
            self = self.close_block();
        }
        let error = self.last_error();
        let end_time = self.clock;
        self.push(NodeKind::Step, "end", |n| match error {
            Some(e) => n.with_error(e),
            None => n,
        });
        self.run_end = Some(end_time);
        self.result = Some(result);
        self
    }

    /// Id of the last node recorded under `name`.
    ///
    /// # Panics
    ///
    /// Panics if no node was recorded under that name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> NodeId {
        match self.names.get(name) {
            Some(id) => *id,
            None => panic!("no node named {name:?} in script"),
        }
    }

    /// Recorded nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    /// Indexed snapshot of the recorded nodes.
    #[must_use]
    pub fn graph(&self) -> FlowGraph {
        FlowGraph::from_nodes(self.nodes.clone())
    }

    /// Time the next node would start at.
    #[must_use]
    pub const fn clock(&self) -> i64 {
        self.clock
    }

    /// Run result, once finished.
    #[must_use]
    pub const fn result(&self) -> Option<Status> {
        self.result
    }

    /// The run's terminal state as a graph source would report it.
    #[must_use]
    pub fn terminal_state(&self) -> RunTerminalState {
        match (self.result, self.run_end) {
            (Some(status), Some(end)) => RunTerminalState::finished(status, self.run_start, end),
            _ => RunTerminalState::running(self.run_start),
        }
    }

    /// Extraction context for a run still executing, with "now" at the
    /// script's clock.
    #[must_use]
    pub const fn running_context(&self) -> ExtractionContext {
        ExtractionContext::running(self.run_start, self.clock)
    }

    /// Extraction context for the finished run.
    #[must_use]
    pub fn finished_context(&self) -> ExtractionContext {
        let end = self.run_end.unwrap_or(self.clock);
        ExtractionContext::finished(self.run_start, end, self.clock + self.step_millis)
    }

    /// Records the script as a new run of `job` in `source`.
    pub fn load_into(&self, source: &InMemoryGraphSource, job: &str) -> Result<(RunId, ExecutionId)> {
        let (run, execution) = source.start_run(job, self.run_start);
        source.append_nodes(&execution, self.nodes.iter().cloned())?;
        if let (Some(status), Some(end)) = (self.result, self.run_end) {
            source.finish_run(&run, status, end)?;
        }
        Ok((run, execution))
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch").field("name", &self.name).finish_non_exhaustive()
    }
}
