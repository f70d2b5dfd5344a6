//! Core status and timing model.
//!
//! This module contains the value types shared by the extractor, the
//! aggregator and the caches:
//! - `Status` with its severity order and merge rule
//! - the override-aware `StatusAccumulator`
//! - per-node timing and resolved time spans

mod accumulator;
mod status;
mod timing;

pub use accumulator::{StatusAccumulator, StatusEvent};
pub use status::Status;
pub use timing::{NodeTiming, TimeSpan};
