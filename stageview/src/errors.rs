//! Error types for the stageview crate.
//!
//! Structural problems in an execution graph never surface here: the
//! extractor absorbs them and logs a diagnostic. What remains are failures
//! of the graph source (unknown run, execution or job), bad configuration,
//! and failures of a background computation.

use thiserror::Error;

use crate::graph::ExecutionId;
use crate::graph::RunId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = StageViewError> = std::result::Result<T, E>;

/// The main error type for stageview operations.
///
/// The type is `Clone` because a single failed computation is reported to
/// every caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageViewError {
    /// The graph source has no run with this identifier.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The graph source has no execution with this identifier.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// The graph source has no job with this name.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Any other failure reported by the graph source.
    #[error("Graph source error: {0}")]
    Source(String),

    /// A configuration value could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background computation panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageViewError {
    /// Returns true if the error means the requested entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RunNotFound(_) | Self::ExecutionNotFound(_) | Self::JobNotFound(_)
        )
    }
}

impl From<tokio::task::JoinError> for StageViewError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::Internal(format!("computation panicked: {err}"))
        } else {
            Self::Internal(format!("computation cancelled: {err}"))
        }
    }
}
