//! The stage view query service.
//!
//! This module provides:
//! - Run summaries and stage lists, cached per run and per execution
//! - Run listings with a `since` cut-off
//! - Job overviews
//! - Cache invalidation

mod query;

pub use query::StageViewService;
