//! Blended index column: row-wise mean across sources.

use crate::table::{TableError, TimeSeriesTable};

/// Append `name` as the row-wise mean of every existing column, in place.
///
/// Only present cells count: the divisor is the number of present values in
/// the row, and a row with none gets an unset average. With `ignore_zero`
/// zero cells are skipped as well, so a table that still carries zero
/// sentinels does not drag the mean down.
pub fn add_average_column(
    table: &mut TimeSeriesTable,
    name: &str,
    ignore_zero: bool,
) -> Result<(), TableError> {
    table.push_column(name, |_, row| {
        let (sum, count) = row
            .iter()
            .flatten()
            .filter(|v| !(ignore_zero && **v == 0.0))
            .fold((0.0_f64, 0usize), |(s, n), v| (s + v, n + 1));
        (count > 0).then(|| sum / count as f64)
    })
}
