//! Derived columns and cross-series statistics over merged tables.
//!
//! Every function here is pure apart from [`add_average_column`], which is
//! the one documented in-place augmentation.

pub mod average;
pub mod convert;
pub mod correlation;
pub mod sentinel;

pub use average::add_average_column;
pub use convert::convert_units;
pub use correlation::{
    correlate, pct_change, CorrelationMatrix, CorrelationMethod, DateWindow, WindowError,
};
pub use sentinel::{strip_zero_sentinels, SentinelPolicy};
