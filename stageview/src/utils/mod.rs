//! Time helpers shared across the crate.

pub mod timestamps;

pub use timestamps::{
    iso_from_millis, millis_to_datetime, now_millis, Clock, ManualClock, SystemClock, Timestamp,
};
