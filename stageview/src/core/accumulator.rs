//! Override-aware status accumulation.
//!
//! Node errors and explicit result overrides are fed to the accumulator as
//! tagged events in creation order. An override supersedes every error seen
//! before it; errors seen afterwards merge on top of it.

use super::Status;

/// An event that influences a derived status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// An uncaught error of the given severity.
    Error(Status),
    /// An explicit result directive.
    Override(Status),
}

/// Folds [`StatusEvent`]s into a terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusAccumulator {
    forced: Option<Status>,
    errors: Status,
}

impl StatusAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event.
    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Error(severity) => {
                self.errors = self.errors.merge(severity);
            }
            StatusEvent::Override(status) => {
                // A run's result only ever gets worse.
                self.forced = Some(self.forced.map_or(status, |f| f.merge(status)));
                self.errors = Status::NotExecuted;
            }
        }
    }

    /// Returns the accumulator with `event` applied.
    #[must_use]
    pub fn with(mut self, event: StatusEvent) -> Self {
        self.apply(event);
        self
    }

    /// The override in effect, if any.
    #[must_use]
    pub const fn forced(&self) -> Option<Status> {
        self.forced
    }

    /// Returns true if any override has been applied.
    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        self.forced.is_some()
    }

    /// Resolves to a terminal status; no events means `Success`.
    #[must_use]
    pub fn resolve(&self) -> Status {
        self.forced
            .unwrap_or(Status::Success)
            .merge(self.errors)
            .merge(Status::Success)
    }
}
