//! The execution and run tiers of the derived-view cache.

use std::sync::Arc;

use super::single_flight::{CacheStats, CacheValue, SingleFlightCache};
use crate::aggregate::RunSummary;
use crate::config::CacheConfig;
use crate::extract::ExecutionStages;
use crate::graph::{ExecutionId, RunId};
use crate::utils::Clock;

impl CacheValue for ExecutionStages {
    fn is_final(&self) -> bool {
        self.complete
    }
}

impl CacheValue for RunSummary {
    fn is_final(&self) -> bool {
        self.is_terminal()
    }
}

/// Both cache tiers, configured alike.
#[derive(Debug)]
pub struct DerivedViewCache {
    executions: SingleFlightCache<ExecutionId, ExecutionStages>,
    runs: SingleFlightCache<RunId, RunSummary>,
}

impl DerivedViewCache {
    /// Creates empty tiers.
    #[must_use]
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            executions: SingleFlightCache::new(
                "executions",
                config.in_progress_ttl_ms,
                Arc::clone(&clock),
            ),
            runs: SingleFlightCache::new("runs", config.in_progress_ttl_ms, clock),
        }
    }

    /// Stages per execution.
    #[must_use]
    pub const fn executions(&self) -> &SingleFlightCache<ExecutionId, ExecutionStages> {
        &self.executions
    }

    /// Summaries per run.
    #[must_use]
    pub const fn runs(&self) -> &SingleFlightCache<RunId, RunSummary> {
        &self.runs
    }

    /// Clears both tiers.
    pub fn invalidate_all(&self) {
        self.executions.invalidate_all();
        self.runs.invalidate_all();
    }

    /// Counters of the execution tier and the run tier.
    #[must_use]
    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.executions.stats(), self.runs.stats())
    }
}
