//! Status enum and its severity order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The derived status of a stage or run.
///
/// Terminal values are ordered by severity:
/// `NotExecuted < Success < Unstable < Failed < Aborted`.
/// The two non-terminal markers rank above every terminal value so that a
/// merge involving them never yields a terminal result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Nothing ran.
    #[default]
    NotExecuted,
    /// Still executing.
    InProgress,
    /// Blocked waiting for external input.
    PausedPendingInput,
    /// Completed without uncaught errors.
    Success,
    /// Completed, but marked unstable.
    Unstable,
    /// Completed with an uncaught failure.
    Failed,
    /// Interrupted.
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExecuted => write!(f, "NOT_EXECUTED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::PausedPendingInput => write!(f, "PAUSED_PENDING_INPUT"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Unstable => write!(f, "UNSTABLE"),
            Self::Failed => write!(f, "FAILED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl Status {
    const fn severity(self) -> u8 {
        match self {
            Self::NotExecuted => 0,
            Self::Success => 1,
            Self::Unstable => 2,
            Self::Failed => 3,
            Self::Aborted => 4,
            Self::InProgress => 5,
            Self::PausedPendingInput => 6,
        }
    }

    /// Returns true if the status is a final result.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress | Self::PausedPendingInput)
    }

    /// Returns true for results worse than `Success`.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Unstable | Self::Failed | Self::Aborted)
    }

    /// Merges two statuses, keeping the more severe one.
    ///
    /// Associative and commutative, with `NotExecuted` as identity.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Merges any number of statuses. An empty input yields `NotExecuted`.
    #[must_use]
    pub fn merge_all<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        statuses.into_iter().fold(Self::NotExecuted, Self::merge)
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}
