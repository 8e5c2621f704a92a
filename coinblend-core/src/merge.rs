//! Multi-source merge onto a common timeline.
//!
//! Given several datasets, pull one named field out of each and outer-join
//! them by row key. Each source becomes one column named after its
//! `source_id`, in input order. Missing observations stay unset: no fill.

use crate::data::SourceDataset;
use crate::table::{RowKey, TimeSeriesTable};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("source '{0}' appears more than once; each source must map to one column")]
    DuplicateSource(String),
}

/// Outer-join `field` from every dataset into one table, one column per source.
///
/// A dataset without `field` still contributes a column, unset on every row.
/// An empty input yields an empty table.
pub fn merge(datasets: &[SourceDataset], field: &str) -> Result<TimeSeriesTable, MergeError> {
    for (i, ds) in datasets.iter().enumerate() {
        if datasets[..i].iter().any(|d| d.source_id == ds.source_id) {
            return Err(MergeError::DuplicateSource(ds.source_id.clone()));
        }
    }

    // Collect the union of all keys
    let keys: BTreeSet<RowKey> = datasets
        .iter()
        .flat_map(|ds| ds.table.keys().copied())
        .collect();

    for ds in datasets {
        if !ds.table.has_column(field) {
            tracing::warn!(
                source = %ds.source_id,
                field,
                "field missing from source, column will be unset"
            );
        }
    }

    let mut merged = TimeSeriesTable::new(datasets.iter().map(|ds| ds.source_id.clone()));
    for key in keys {
        let row = datasets
            .iter()
            .map(|ds| ds.table.get(&key, field))
            .collect();
        merged.insert_row(key, row);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::day_key;
    use chrono::NaiveDate;

    fn key(d: u32) -> RowKey {
        day_key(NaiveDate::from_ymd_opt(2017, 2, d).unwrap())
    }

    fn dataset(source: &str, points: &[(u32, f64)]) -> SourceDataset {
        let mut t = TimeSeriesTable::new(["open", "price"]);
        for &(d, p) in points {
            t.insert_row(key(d), vec![Some(p - 1.0), Some(p)]);
        }
        SourceDataset::new(source, format!("ds/{source}"), t)
    }

    #[test]
    fn union_of_dates_with_unset_gaps() {
        let input = vec![
            dataset("KRAKEN", &[(1, 100.0), (2, 101.0), (3, 102.0)]),
            dataset("BITSTAMP", &[(1, 200.0), (3, 202.0)]),
        ];

        let merged = merge(&input, "price").unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.columns(), &["KRAKEN".to_string(), "BITSTAMP".to_string()]);
        assert_eq!(merged.get(&key(2), "KRAKEN"), Some(101.0));
        assert_eq!(merged.get(&key(2), "BITSTAMP"), None);
    }

    #[test]
    fn column_order_follows_input_order() {
        let a = dataset("Z", &[(1, 1.0)]);
        let b = dataset("A", &[(1, 2.0)]);
        let merged = merge(&[a, b], "price").unwrap();
        assert_eq!(merged.columns(), &["Z".to_string(), "A".to_string()]);
    }

    #[test]
    fn missing_field_gives_unset_column() {
        let mut other = TimeSeriesTable::new(["close"]);
        other.insert_row(key(5), vec![Some(9.0)]);
        let input = vec![
            dataset("KRAKEN", &[(1, 100.0)]),
            SourceDataset::new("ODD", "ds/odd", other),
        ];

        let merged = merge(&input, "price").unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.column_values("ODD").unwrap(), vec![None, None]);
    }

    #[test]
    fn empty_input_is_empty_table() {
        let merged = merge(&[], "price").unwrap();
        assert!(merged.is_empty());
        assert!(merged.columns().is_empty());
    }

    #[test]
    fn duplicate_source_is_rejected() {
        let input = vec![dataset("X", &[(1, 1.0)]), dataset("X", &[(2, 2.0)])];
        assert_eq!(
            merge(&input, "price"),
            Err(MergeError::DuplicateSource("X".into()))
        );
    }

    #[test]
    fn merge_is_deterministic() {
        let input = vec![
            dataset("KRAKEN", &[(1, 100.0), (4, 103.0)]),
            dataset("COINBASE", &[(2, 300.0), (4, 303.0)]),
        ];
        assert_eq!(merge(&input, "price").unwrap(), merge(&input, "price").unwrap());
    }
}
