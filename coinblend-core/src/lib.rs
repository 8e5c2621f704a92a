//! coinblend core: fetch, cache, merge and compare multi-source price histories.
//!
//! This crate contains the reusable pipeline pieces:
//! - Time-indexed tables with nullable numeric columns
//! - Quandl / Poloniex / synthetic providers behind one trait
//! - Parquet dataset cache and the cached fetcher on top of it
//! - Outer-join merge of one field across many sources
//! - Sentinel cleaning, blended averages, unit conversion and correlation

pub mod analysis;
pub mod data;
pub mod merge;
pub mod table;

pub use merge::{merge, MergeError};
pub use table::{day_key, RowKey, Series, TableError, TimeSeriesTable};
