//! Execution nodes and the identifiers that address them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::{NodeTiming, Status};

/// Identifier of a node, unique within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of a live execution object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Generates a fresh execution id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted run: the job name plus the build number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunId {
    /// Owning job.
    pub job: String,
    /// Build number, starting at 1.
    pub number: u32,
}

impl RunId {
    /// Creates a run id.
    #[must_use]
    pub fn new(job: impl Into<String>, number: u32) -> Self {
        Self {
            job: job.into(),
            number,
        }
    }

    /// Display name of the run, e.g. `#2`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("#{}", self.number)
    }

    /// Parses a display name such as `#2` into a build number.
    #[must_use]
    pub fn parse_display_name(name: &str) -> Option<u32> {
        name.trim().strip_prefix('#')?.parse().ok()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.number)
    }
}

/// Structural role of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    /// An ordinary step.
    Step,
    /// Opens a block. `stage` names the stage when the block is a stage boundary.
    BlockStart {
        /// Stage label, if this block is a stage.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    /// Closes the block opened by `start`.
    BlockEnd {
        /// The matching block start.
        start: NodeId,
    },
    /// Flat stage declaration; the stage lasts until the next marker.
    StageMarker {
        /// Stage label.
        name: String,
    },
}

impl NodeKind {
    /// The stage name if this node opens a stage.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::BlockStart { stage: Some(name) } | Self::StageMarker { name } => Some(name),
            _ => None,
        }
    }
}

/// An error attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    /// Human-readable message.
    pub message: String,
    /// The result this error implies when uncaught.
    pub severity: Status,
}

impl NodeError {
    /// A hard failure.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Status::Failed,
        }
    }

    /// An interruption.
    #[must_use]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Status::Aborted,
        }
    }

    /// A soft failure.
    #[must_use]
    pub fn unstable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Status::Unstable,
        }
    }
}

/// One recorded step of a pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionNode {
    /// Stable identifier.
    pub id: NodeId,
    /// Parents in order; merge nodes have several.
    #[serde(default)]
    pub parents: Vec<NodeId>,
    /// Structural role.
    pub kind: NodeKind,
    /// Display name of the step.
    #[serde(default)]
    pub display_name: String,
    /// Timing, absent while unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<NodeTiming>,
    /// Time spent blocked on external input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_millis: Option<i64>,
    /// Whether the node is currently blocked on input.
    #[serde(default)]
    pub awaiting_input: bool,
    /// Attached error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Explicit result directive recorded at this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_override: Option<Status>,
}

impl ExecutionNode {
    /// Creates a node with no annotations.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            parents: Vec::new(),
            kind,
            display_name: String::new(),
            timing: None,
            pause_millis: None,
            awaiting_input: false,
            error: None,
            result_override: None,
        }
    }

    /// Creates a step node.
    #[must_use]
    pub fn step(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Step)
    }

    /// Sets the parents.
    #[must_use]
    pub fn with_parents(mut self, parents: impl IntoIterator<Item = NodeId>) -> Self {
        self.parents = parents.into_iter().collect();
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the timing.
    #[must_use]
    pub const fn with_timing(mut self, timing: NodeTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Sets the pause time.
    #[must_use]
    pub const fn with_pause(mut self, pause_millis: i64) -> Self {
        self.pause_millis = Some(pause_millis);
        self
    }

    /// Marks the node as blocked on input.
    #[must_use]
    pub const fn awaiting_input(mut self) -> Self {
        self.awaiting_input = true;
        self
    }

    /// Attaches an error.
    #[must_use]
    pub fn with_error(mut self, error: NodeError) -> Self {
        self.error = Some(error);
        self
    }

    /// Records a result override.
    #[must_use]
    pub const fn with_override(mut self, status: Status) -> Self {
        self.result_override = Some(status);
        self
    }

    /// Pause time, clamped to be non-negative.
    #[must_use]
    pub fn pause(&self) -> i64 {
        self.pause_millis.unwrap_or(0).max(0)
    }
}
