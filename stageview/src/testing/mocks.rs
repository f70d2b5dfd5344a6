//! Graph source wrappers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Result, StageViewError};
use crate::graph::{ExecutionGraphSource, ExecutionId, ExecutionNode, RunId, RunTerminalState};

/// Wraps a source and counts how often node lists are fetched.
///
/// Fetches can be slowed down so concurrent callers overlap, and can be made
/// to fail a fixed number of times.
#[derive(Debug)]
pub struct CountingGraphSource<S> {
    inner: Arc<S>,
    node_fetches: AtomicUsize,
    state_fetches: AtomicUsize,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
    fetched: Mutex<Vec<ExecutionId>>,
}

impl<S: ExecutionGraphSource> CountingGraphSource<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            node_fetches: AtomicUsize::new(0),
            state_fetches: AtomicUsize::new(0),
            delay: None,
            failures_left: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps for `delay` inside every node fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleeps for `ms` milliseconds inside every node fetch.
    #[must_use]
    pub const fn with_delay_ms(self, ms: u64) -> Self {
        self.with_delay(Duration::from_millis(ms))
    }

    /// Makes the next `count` node fetches fail with a source error.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of node fetches so far, failed ones included.
    #[must_use]
    pub fn node_fetches(&self) -> usize {
        self.node_fetches.load(Ordering::SeqCst)
    }

    /// Number of terminal state lookups so far.
    #[must_use]
    pub fn state_fetches(&self) -> usize {
        self.state_fetches.load(Ordering::SeqCst)
    }

    /// Executions fetched, in call order.
    #[must_use]
    pub fn fetched(&self) -> Vec<ExecutionId> {
        self.fetched.lock().clone()
    }

    /// The wrapped source.
    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Resets all counters.
    pub fn reset(&self) {
        self.node_fetches.store(0, Ordering::SeqCst);
        self.state_fetches.store(0, Ordering::SeqCst);
        self.fetched.lock().clear();
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: ExecutionGraphSource> ExecutionGraphSource for CountingGraphSource<S> {
    async fn execution_for(&self, run: &RunId) -> Result<ExecutionId> {
        self.inner.execution_for(run).await
    }

    async fn list_nodes(&self, execution: &ExecutionId) -> Result<Vec<ExecutionNode>> {
        self.node_fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().push(*execution);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_failure() {
            return Err(StageViewError::Source(format!(
                "injected failure listing {execution}"
            )));
        }
        self.inner.list_nodes(execution).await
    }

    async fn run_terminal_state(&self, run: &RunId) -> Result<RunTerminalState> {
        self.state_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.run_terminal_state(run).await
    }

    async fn list_runs(&self, job: &str) -> Result<Vec<RunId>> {
        self.inner.list_runs(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphSource;

    #[tokio::test]
    async fn test_counts_node_fetches() {
        let inner = Arc::new(InMemoryGraphSource::new());
        let (_, exec) = inner.start_run("job", 0);
        let source = CountingGraphSource::new(Arc::clone(&inner));

        source.list_nodes(&exec).await.unwrap();
        source.list_nodes(&exec).await.unwrap();

        assert_eq!(source.node_fetches(), 2);
        assert_eq!(source.fetched(), vec![exec, exec]);

        source.reset();
        assert_eq!(source.node_fetches(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let inner = Arc::new(InMemoryGraphSource::new());
        let (run, exec) = inner.start_run("job", 0);
        let source = CountingGraphSource::new(inner);
        source.fail_next(1);

        let err = source.list_nodes(&exec).await.unwrap_err();
        assert!(matches!(err, StageViewError::Source(_)));
        assert!(source.list_nodes(&exec).await.is_ok());

        source.run_terminal_state(&run).await.unwrap();
        assert_eq!(source.state_fetches(), 1);
    }

    #[tokio::test]
    async fn test_delay_is_applied() {
        let inner = Arc::new(InMemoryGraphSource::new());
        let (_, exec) = inner.start_run("job", 0);
        let source = CountingGraphSource::new(inner).with_delay_ms(20);

        let started = std::time::Instant::now();
        source.list_nodes(&exec).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
