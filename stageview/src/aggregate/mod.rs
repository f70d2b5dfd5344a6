//! Run-level aggregation.

mod aggregator;
mod links;
mod summary;

pub use aggregator::RunAggregator;
pub use links::{JobLinks, LinkBuilder, RunLinks};
pub use summary::{JobSummary, RunSummary};
