//! Unit conversion against an index series.

use crate::table::{Series, TableError, TimeSeriesTable};

/// Multiply native-unit values by the index value at the same key.
///
/// With `rate_column = Some(c)` only `c` is converted and the result holds
/// that single column; with `None` every column is converted. A key missing
/// from `index`, or an unset cell, yields an unset result.
pub fn convert_units(
    dependent: &TimeSeriesTable,
    rate_column: Option<&str>,
    index: &Series,
) -> Result<TimeSeriesTable, TableError> {
    let source = match rate_column {
        Some(c) => dependent.select(&[c])?,
        None => dependent.clone(),
    };

    let mut out = TimeSeriesTable::new(source.columns().iter().cloned());
    for (key, row) in source.rows() {
        let rate = index.get(key);
        let converted = row
            .iter()
            .map(|cell| match (cell, rate) {
                (Some(v), Some(r)) => Some(v * r),
                _ => None,
            })
            .collect();
        out.insert_row(*key, converted);
    }
    Ok(out)
}
