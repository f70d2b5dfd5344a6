//! Testing utilities for stage views.
//!
//! This module provides:
//! - A script-like builder for execution graphs
//! - A counting wrapper around graph sources
//! - Assertions for stages and run summaries

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_stages_terminal, assert_run_status, assert_stage_names, assert_stage_statuses,
    assert_well_formed,
};
pub use fixtures::{Branch, FlowScript, DEFAULT_STEP_MILLIS};
pub use mocks::CountingGraphSource;
