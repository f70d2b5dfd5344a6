//! # Stageview
//!
//! Stage, status and timing views over pipeline execution graphs.
//!
//! A pipeline run leaves behind a graph of flow nodes: steps, block
//! boundaries, stage markers and parallel branches. Stageview walks that
//! graph and answers the questions a dashboard asks:
//!
//! - **Stages**: which logical stages ran, in order, and how long each took
//! - **Status**: the worst outcome per stage, honouring caught errors and
//!   explicit result overrides
//! - **Timing**: start, end, duration and time spent paused for input
//! - **Caching**: derived views are computed once per concurrent burst of
//!   queries and kept for finished runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stageview::prelude::*;
//!
//! let source = Arc::new(InMemoryGraphSource::new());
//! // ... record runs into the source ...
//!
//! let service = StageViewService::new(source, StageViewConfig::from_env()?);
//! let summary = service.get_run_summary(&RunId::new("my-job", 1)).await?;
//! println!("{} finished as {}", summary.name, summary.status);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod extract;
pub mod graph;
pub mod observability;
pub mod service;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::{JobSummary, LinkBuilder, RunAggregator, RunSummary};
    pub use crate::cache::{CacheStats, CacheValue, SingleFlightCache};
    pub use crate::config::{CacheConfig, LinkConfig, LoggingConfig, StageViewConfig};
    pub use crate::core::{NodeTiming, Status, StatusAccumulator, StatusEvent, TimeSpan};
    pub use crate::errors::{Result, StageViewError};
    pub use crate::extract::{ExecutionStages, ExtractionContext, Stage, StageExtractor};
    pub use crate::graph::{
        ExecutionGraphSource, ExecutionId, ExecutionNode, FlowGraph, InMemoryGraphSource,
        NodeError, NodeId, NodeKind, RunId, RunTerminalState,
    };
    pub use crate::observability::init_tracing;
    pub use crate::service::StageViewService;
    pub use crate::utils::{Clock, ManualClock, SystemClock};
}
