//! Stage extraction.
//!
//! Partitions an execution graph into logical stages and derives each
//! stage's status and timing.

mod extractor;
mod stage;

pub use extractor::{ExtractionContext, StageExtractor};
pub use stage::{ExecutionStages, Stage, StageLinks};
