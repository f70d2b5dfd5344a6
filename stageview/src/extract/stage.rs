//! Stage view types produced by the extractor.

use serde::{Deserialize, Serialize};

use crate::core::{Status, TimeSpan};
use crate::graph::{ExecutionId, NodeError, NodeId};

/// Hyperlinks attached to a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLinks {
    /// Link to the stage's own description.
    #[serde(rename = "self")]
    pub self_href: String,
}

/// A named, contiguous group of execution nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Id of the node that opened the stage.
    pub id: NodeId,
    /// Stage label.
    pub name: String,
    /// Derived status.
    pub status: Status,
    /// Start of the first timed member.
    pub start_time_millis: i64,
    /// Active duration, pause excluded.
    pub duration_millis: i64,
    /// Time spent waiting on input.
    pub pause_duration_millis: i64,
    /// Member nodes in creation order, boundaries included.
    pub member_ids: Vec<NodeId>,
    /// The node that closed the stage, for block-scoped stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_node: Option<NodeId>,
    /// True while no boundary has closed the stage.
    pub open: bool,
    /// The uncaught error behind a failed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Hyperlinks.
    #[serde(rename = "_links", default)]
    pub links: StageLinks,
}

impl Stage {
    /// Wall-clock end: start plus active and paused time.
    #[must_use]
    pub fn end_time_millis(&self) -> i64 {
        self.start_time_millis
            .saturating_add(self.duration_millis)
            .saturating_add(self.pause_duration_millis)
    }

    /// Returns true if the stage reports a final status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// All stages of one execution, plus the execution-wide facts the run
/// aggregator needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStages {
    /// The execution walked.
    pub execution: ExecutionId,
    /// Stages in boundary order.
    pub stages: Vec<Stage>,
    /// Span of the whole graph.
    pub span: TimeSpan,
    /// Result override in effect at the end of the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced: Option<Status>,
    /// Whether the owning run had finished when the graph was walked.
    pub complete: bool,
    /// Number of nodes walked.
    pub node_count: usize,
    /// Number of structural anomalies absorbed.
    pub anomaly_count: usize,
}

impl ExecutionStages {
    /// Stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Stage statuses in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<Status> {
        self.stages.iter().map(|s| s.status).collect()
    }
}
