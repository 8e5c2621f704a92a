//! Zero-as-missing cleaning.
//!
//! Exchanges report `0` for days without trades. A market price is never
//! truly zero, so an exact zero is read as "no observation". This is a blunt
//! value heuristic: a legitimately zero-valued series loses data, which is
//! why the pipeline exposes it as a [`SentinelPolicy`] rather than always
//! applying it.

use crate::table::TimeSeriesTable;
use serde::{Deserialize, Serialize};

/// Whether zero cells are treated as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelPolicy {
    #[default]
    StripZeros,
    Keep,
}

impl SentinelPolicy {
    pub fn apply(self, table: &TimeSeriesTable) -> TimeSeriesTable {
        match self {
            SentinelPolicy::StripZeros => strip_zero_sentinels(table),
            SentinelPolicy::Keep => table.clone(),
        }
    }
}

/// New table with every cell equal to exactly `0.0` unset. Idempotent.
pub fn strip_zero_sentinels(table: &TimeSeriesTable) -> TimeSeriesTable {
    table.map_cells(|cell| cell.filter(|v| *v != 0.0))
}
