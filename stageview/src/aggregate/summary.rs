//! Run and job level view types.

use serde::{Deserialize, Serialize};

use super::links::{JobLinks, RunLinks};
use crate::core::Status;
use crate::extract::Stage;
use crate::graph::RunId;

/// Status and timing of a whole run, with its stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// The run.
    pub id: RunId,
    /// Display name, `#<number>`.
    pub name: String,
    /// Run-level status.
    pub status: Status,
    /// Start of the first timed node.
    pub start_time_millis: i64,
    /// Resolved end of the last node, or now while running.
    pub end_time_millis: i64,
    /// Active duration, pause excluded.
    pub duration_millis: i64,
    /// Total time spent waiting on input.
    pub pause_duration_millis: i64,
    /// Stages in boundary order.
    pub stages: Vec<Stage>,
    /// Hyperlinks.
    #[serde(rename = "_links")]
    pub links: RunLinks,
}

impl RunSummary {
    /// Returns true once the run reports a final status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stage statuses in order.
    #[must_use]
    pub fn stage_statuses(&self) -> Vec<Status> {
        self.stages.iter().map(|s| s.status).collect()
    }
}

/// Overview of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Job name.
    pub name: String,
    /// Number of recorded runs.
    pub run_count: usize,
    /// Hyperlinks.
    #[serde(rename = "_links")]
    pub links: JobLinks,
}
