//! The query surface: run summaries, stages, run listings, and job overviews.

use dashmap::DashMap;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregate::{JobSummary, LinkBuilder, RunAggregator, RunSummary};
use crate::cache::{CacheStats, DerivedViewCache};
use crate::config::StageViewConfig;
use crate::errors::Result;
use crate::extract::{ExecutionStages, ExtractionContext, Stage, StageExtractor};
use crate::graph::{ExecutionGraphSource, ExecutionId, FlowGraph, RunId, RunTerminalState};
use crate::utils::{Clock, SystemClock};

/// State shared with background computations.
struct Inner {
    source: Arc<dyn ExecutionGraphSource>,
    cache: DerivedViewCache,
    extractor: StageExtractor,
    aggregator: RunAggregator,
    clock: Arc<dyn Clock>,
    /// Execution each summarized run was derived from.
    executions_by_run: DashMap<RunId, ExecutionId>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("cache", &self.cache)
            .field("aggregator", &self.aggregator)
            .field("clock", &self.clock)
            .field("tracked_runs", &self.executions_by_run.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn summarize(self: Arc<Self>, run: RunId) -> Result<RunSummary> {
        let execution = self.source.execution_for(&run).await?;
        self.executions_by_run.insert(run.clone(), execution);
        let state = self.source.run_terminal_state(&run).await?;
        let stages = Arc::clone(&self).stages(execution, state).await?;
        Ok(self.aggregator.aggregate(&run, &stages, &state))
    }

    async fn stages(
        self: Arc<Self>,
        execution: ExecutionId,
        state: RunTerminalState,
    ) -> Result<Arc<ExecutionStages>> {
        let stages = self.cached_stages(execution, state).await?;
        if state.is_complete() && !stages.complete {
            // Reused snapshot from before the run finished.
            debug!(execution = %execution, "Discarding in-progress stages of a finished run");
            self.cache.executions().invalidate(&execution);
            return self.cached_stages(execution, state).await;
        }
        Ok(stages)
    }

    async fn cached_stages(
        self: &Arc<Self>,
        execution: ExecutionId,
        state: RunTerminalState,
    ) -> Result<Arc<ExecutionStages>> {
        let inner = Arc::clone(self);
        self.cache
            .executions()
            .get_or_compute(execution, move || inner.walk(execution, state))
            .await
    }

    fn runs_of(&self, execution: &ExecutionId) -> Vec<RunId> {
        self.executions_by_run
            .iter()
            .filter(|entry| entry.value() == execution)
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn walk(
        self: Arc<Self>,
        execution: ExecutionId,
        state: RunTerminalState,
    ) -> Result<ExecutionStages> {
        let nodes = self.source.list_nodes(&execution).await?;
        let graph = FlowGraph::from_nodes(nodes);
        let ctx = ExtractionContext::for_run(&state, self.clock.now_millis());
        Ok(self.extractor.extract(execution, &graph, &ctx))
    }
}

/// Answers stage view queries over an execution graph source.
///
/// Derived views are cached per execution and per run. Views of finished
/// runs are kept until invalidated; views of running ones are recomputed
/// once the configured in-progress TTL has passed.
#[derive(Debug, Clone)]
pub struct StageViewService {
    inner: Arc<Inner>,
    config: StageViewConfig,
}

impl StageViewService {
    /// Creates a service reading the system clock.
    #[must_use]
    pub fn new(source: Arc<dyn ExecutionGraphSource>, config: StageViewConfig) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock))
    }

    /// Creates a service reading `clock` for anything still running.
    #[must_use]
    pub fn with_clock(
        source: Arc<dyn ExecutionGraphSource>,
        config: StageViewConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Inner {
            source,
            cache: DerivedViewCache::new(&config.cache, Arc::clone(&clock)),
            extractor: StageExtractor::new(),
            aggregator: RunAggregator::new(LinkBuilder::new(config.links.url_prefix.clone())),
            clock,
            executions_by_run: DashMap::new(),
        };
        Self {
            inner: Arc::new(inner),
            config,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &StageViewConfig {
        &self.config
    }

    /// Status, timing, and stages of one run.
    pub async fn get_run_summary(&self, run: &RunId) -> Result<Arc<RunSummary>> {
        let inner = Arc::clone(&self.inner);
        let key = run.clone();
        self.inner
            .cache
            .runs()
            .get_or_compute(run.clone(), move || inner.summarize(key))
            .await
    }

    /// Stages of one run, in boundary order.
    pub async fn get_stages(&self, run: &RunId) -> Result<Vec<Stage>> {
        Ok(self.get_run_summary(run).await?.stages.clone())
    }

    /// Summaries of a job's runs, newest first.
    ///
    /// With `since` naming a run (`#N`), the listing stops at that run and
    /// includes it. A name matching no run is ignored.
    pub async fn list_runs(&self, job: &str, since: Option<&str>) -> Result<Vec<Arc<RunSummary>>> {
        let runs = self.inner.source.list_runs(job).await?;
        let cut = since
            .and_then(RunId::parse_display_name)
            .and_then(|number| runs.iter().position(|r| r.number == number));
        let selected = match cut {
            Some(pos) => &runs[..=pos],
            None => &runs[..],
        };

        debug!(job, since, runs = selected.len(), "Listing runs");
        try_join_all(selected.iter().map(|run| self.get_run_summary(run))).await
    }

    /// Overview of a job.
    pub async fn describe_job(&self, job: &str) -> Result<JobSummary> {
        let runs = self.inner.source.list_runs(job).await?;
        Ok(JobSummary {
            name: job.to_string(),
            run_count: runs.len(),
            links: self.inner.aggregator.links().job(job),
        })
    }

    /// Drops the cached summary of `run` and the stages it was built from.
    ///
    /// Returns true if either tier held an entry.
    pub fn invalidate_run(&self, run: &RunId) -> bool {
        info!(run = %run, "Invalidating run summary");
        let execution = self.inner.executions_by_run.get(run).map(|e| *e.value());
        let stages_dropped =
            execution.is_some_and(|execution| self.inner.cache.executions().invalidate(&execution));
        let summary_dropped = self.inner.cache.runs().invalidate(run);
        stages_dropped || summary_dropped
    }

    /// Drops the cached stages of `execution` and every run summary built
    /// from them.
    ///
    /// Returns true if either tier held an entry.
    pub fn invalidate_execution(&self, execution: &ExecutionId) -> bool {
        info!(execution = %execution, "Invalidating execution stages");
        let stages_dropped = self.inner.cache.executions().invalidate(execution);
        let mut summaries_dropped = false;
        for run in self.inner.runs_of(execution) {
            summaries_dropped |= self.inner.cache.runs().invalidate(&run);
        }
        stages_dropped || summaries_dropped
    }

    /// Drops every cached view.
    pub fn invalidate_all(&self) {
        info!("Invalidating all cached views");
        self.inner.cache.invalidate_all();
    }

    /// Counters of the execution tier and the run tier.
    #[must_use]
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        self.inner.cache.stats()
    }
}
