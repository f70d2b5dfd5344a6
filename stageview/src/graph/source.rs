//! The execution graph source interface and an in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::node::{ExecutionId, ExecutionNode, NodeId, RunId};
use crate::core::Status;
use crate::errors::{Result, StageViewError};

/// What the source knows about a run's own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTerminalState {
    /// Final result, once the run has finished.
    pub status: Option<Status>,
    /// When the run started.
    pub start_millis: i64,
    /// When the run finished.
    pub end_millis: Option<i64>,
}

impl RunTerminalState {
    /// State of a run that is still executing.
    #[must_use]
    pub const fn running(start_millis: i64) -> Self {
        Self {
            status: None,
            start_millis,
            end_millis: None,
        }
    }

    /// State of a finished run.
    #[must_use]
    pub const fn finished(status: Status, start_millis: i64, end_millis: i64) -> Self {
        Self {
            status: Some(status),
            start_millis,
            end_millis: Some(end_millis),
        }
    }

    /// Returns true once the run has a final result.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status.is_some()
    }
}

/// Supplies execution graphs and run metadata.
///
/// `list_nodes` must return a point-in-time snapshot in creation order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGraphSource: Send + Sync {
    /// Resolves the live execution backing a run.
    async fn execution_for(&self, run: &RunId) -> Result<ExecutionId>;

    /// Snapshot of an execution's nodes, in creation order.
    async fn list_nodes(&self, execution: &ExecutionId) -> Result<Vec<ExecutionNode>>;

    /// The run's own status and timing.
    async fn run_terminal_state(&self, run: &RunId) -> Result<RunTerminalState>;

    /// Runs of a job, newest first.
    async fn list_runs(&self, job: &str) -> Result<Vec<RunId>>;
}

#[derive(Debug, Clone)]
struct RunRecord {
    execution: ExecutionId,
    state: RunTerminalState,
}

/// Thread-safe in-memory graph source.
///
/// Node lists are append-only; the only in-place change allowed is resolving
/// an existing node (typically the head of a running execution).
#[derive(Debug, Default)]
pub struct InMemoryGraphSource {
    jobs: RwLock<HashMap<String, Vec<RunId>>>,
    runs: RwLock<HashMap<RunId, RunRecord>>,
    executions: DashMap<ExecutionId, Arc<RwLock<Vec<ExecutionNode>>>>,
}

impl InMemoryGraphSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new run of `job` and returns its ids.
    pub fn start_run(&self, job: &str, start_millis: i64) -> (RunId, ExecutionId) {
        let execution = ExecutionId::new();
        let mut jobs = self.jobs.write();
        let runs = jobs.entry(job.to_string()).or_default();
        let number = u32::try_from(runs.len()).map_or(u32::MAX, |n| n.saturating_add(1));
        let run = RunId::new(job, number);

        // A run becomes listable only once it can be resolved.
        self.executions
            .insert(execution, Arc::new(RwLock::new(Vec::new())));
        self.runs.write().insert(
            run.clone(),
            RunRecord {
                execution,
                state: RunTerminalState::running(start_millis),
            },
        );
        runs.push(run.clone());
        drop(jobs);

        debug!(run = %run, execution = %execution, "Run started");
        (run, execution)
    }

    /// Appends a node to an execution.
    pub fn append_node(&self, execution: &ExecutionId, node: ExecutionNode) -> Result<()> {
        let nodes = self.nodes_of(execution)?;
        nodes.write().push(node);
        Ok(())
    }

    /// Appends several nodes to an execution.
    pub fn append_nodes(
        &self,
        execution: &ExecutionId,
        nodes: impl IntoIterator<Item = ExecutionNode>,
    ) -> Result<()> {
        let list = self.nodes_of(execution)?;
        list.write().extend(nodes);
        Ok(())
    }

    /// Resolves an existing node in place.
    ///
    /// Returns `false` if the node does not exist.
    pub fn update_node<F>(&self, execution: &ExecutionId, id: NodeId, update: F) -> Result<bool>
    where
        F: FnOnce(&mut ExecutionNode),
    {
        let list = self.nodes_of(execution)?;
        let mut nodes = list.write();
        Ok(nodes
            .iter_mut()
            .find(|n| n.id == id)
            .map(update)
            .is_some())
    }

    /// Records the final result of a run.
    pub fn finish_run(&self, run: &RunId, status: Status, end_millis: i64) -> Result<()> {
        let mut runs = self.runs.write();
        let record = runs
            .get_mut(run)
            .ok_or_else(|| StageViewError::RunNotFound(run.clone()))?;
        record.state.status = Some(status);
        record.state.end_millis = Some(end_millis);
        debug!(run = %run, status = %status, "Run finished");
        Ok(())
    }

    /// Number of nodes currently recorded for an execution.
    pub fn node_count(&self, execution: &ExecutionId) -> Result<usize> {
        Ok(self.nodes_of(execution)?.read().len())
    }

    fn nodes_of(&self, execution: &ExecutionId) -> Result<Arc<RwLock<Vec<ExecutionNode>>>> {
        self.executions
            .get(execution)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StageViewError::ExecutionNotFound(*execution))
    }
}

#[async_trait]
impl ExecutionGraphSource for InMemoryGraphSource {
    async fn execution_for(&self, run: &RunId) -> Result<ExecutionId> {
        self.runs
            .read()
            .get(run)
            .map(|r| r.execution)
            .ok_or_else(|| StageViewError::RunNotFound(run.clone()))
    }

    async fn list_nodes(&self, execution: &ExecutionId) -> Result<Vec<ExecutionNode>> {
        let nodes = self.nodes_of(execution)?;
        let snapshot = nodes.read().clone();
        Ok(snapshot)
    }

    async fn run_terminal_state(&self, run: &RunId) -> Result<RunTerminalState> {
        self.runs
            .read()
            .get(run)
            .map(|r| r.state)
            .ok_or_else(|| StageViewError::RunNotFound(run.clone()))
    }

    async fn list_runs(&self, job: &str) -> Result<Vec<RunId>> {
        self.jobs
            .read()
            .get(job)
            .map(|runs| runs.iter().rev().cloned().collect())
            .ok_or_else(|| StageViewError::JobNotFound(job.to_string()))
    }
}
