//! Per-node timing annotations and time spans.

use serde::{Deserialize, Serialize};

/// Timing recorded on a single execution node, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTiming {
    /// When the node started.
    pub start_millis: i64,
    /// How long the node ran, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<i64>,
}

impl NodeTiming {
    /// Timing with only a start time.
    #[must_use]
    pub const fn started(start_millis: i64) -> Self {
        Self {
            start_millis,
            duration_millis: None,
        }
    }

    /// Timing with a start time and a duration.
    #[must_use]
    pub const fn completed(start_millis: i64, duration_millis: i64) -> Self {
        Self {
            start_millis,
            duration_millis: Some(duration_millis),
        }
    }

    /// The end time, if the duration is known.
    #[must_use]
    pub fn end_millis(&self) -> Option<i64> {
        self.duration_millis
            .map(|d| self.start_millis.saturating_add(d.max(0)))
    }
}

/// A resolved wall-clock window with the pause time spent inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSpan {
    /// Start of the window.
    pub start_millis: i64,
    /// End of the window.
    pub end_millis: i64,
    /// Time spent paused inside the window.
    pub pause_millis: i64,
}

impl TimeSpan {
    /// Creates a span. A negative pause is clamped to zero.
    #[must_use]
    pub fn new(start_millis: i64, end_millis: i64, pause_millis: i64) -> Self {
        Self {
            start_millis,
            end_millis,
            pause_millis: pause_millis.max(0),
        }
    }

    /// Wall-clock length of the window.
    #[must_use]
    pub fn wall_millis(&self) -> i64 {
        self.end_millis.saturating_sub(self.start_millis).max(0)
    }

    /// Active time: wall-clock length minus pause, never negative.
    #[must_use]
    pub fn active_millis(&self) -> i64 {
        self.wall_millis().saturating_sub(self.pause_millis).max(0)
    }
}
