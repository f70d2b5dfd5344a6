//! Single-flight caching of derived views.

mod single_flight;
mod tiers;

pub use single_flight::{CacheStats, CacheValue, SingleFlightCache};
pub use tiers::DerivedViewCache;
