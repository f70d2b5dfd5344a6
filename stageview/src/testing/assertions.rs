//! Test assertions for stage views.

use crate::aggregate::RunSummary;
use crate::core::Status;
use crate::extract::{ExecutionStages, Stage};

/// Asserts that the stages have the expected names, in order.
pub fn assert_stage_names(stages: &[Stage], expected: &[&str]) {
    let actual: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(actual, expected, "Stage names differ");
}

/// Asserts that the stages have the expected statuses, in order.
pub fn assert_stage_statuses(stages: &[Stage], expected: &[Status]) {
    let actual: Vec<Status> = stages.iter().map(|s| s.status).collect();
    assert_eq!(
        actual,
        expected,
        "Stage statuses differ for {:?}",
        stages.iter().map(|s| &s.name).collect::<Vec<_>>()
    );
}

/// Asserts that every stage of a finished execution is closed and terminal.
pub fn assert_all_stages_terminal(stages: &ExecutionStages) {
    for stage in &stages.stages {
        assert!(
            stage.is_terminal(),
            "Expected stage '{}' to be terminal, got {}",
            stage.name,
            stage.status
        );
    }
}

/// Asserts that no duration or pause in the summary is negative, and that
/// stages start in order.
pub fn assert_well_formed(summary: &RunSummary) {
    assert!(summary.duration_millis >= 0, "Negative run duration");
    assert!(summary.pause_duration_millis >= 0, "Negative run pause");
    for stage in &summary.stages {
        assert!(
            stage.duration_millis >= 0 && stage.pause_duration_millis >= 0,
            "Negative timing on stage '{}'",
            stage.name
        );
    }
    for pair in summary.stages.windows(2) {
        assert!(
            pair[0].start_time_millis <= pair[1].start_time_millis,
            "Stage '{}' starts before '{}'",
            pair[1].name,
            pair[0].name
        );
    }
}

/// Asserts the run-level status of a summary.
pub fn assert_run_status(summary: &RunSummary, expected: Status) {
    assert_eq!(
        summary.status, expected,
        "Expected run {} to be {}, got {}",
        summary.name, expected, summary.status
    );
}
