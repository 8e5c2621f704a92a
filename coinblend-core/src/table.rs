//! Time-indexed tables with named, nullable numeric columns.
//!
//! A [`TimeSeriesTable`] is the unit every stage of the pipeline passes around:
//! providers parse responses into one, the cache persists one per dataset, the
//! merger builds one from many, and the analysis functions derive new ones.
//!
//! Rows are keyed by a UTC timestamp and kept in a `BTreeMap`, so keys are
//! unique and iteration is always in ascending order. A missing observation is
//! `None` ("unset"), never zero. Column order is insertion order.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use thiserror::Error;

/// Row key: a UTC timestamp. Daily data uses midnight.
pub type RowKey = NaiveDateTime;

/// Row key for a calendar day.
pub fn day_key(date: NaiveDate) -> RowKey {
    date.and_time(NaiveTime::MIN)
}

/// Column-level errors raised by table operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),
}

/// Ordered mapping from row key to a row of named, nullable `f64` fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeriesTable {
    columns: Vec<String>,
    /// Every row has exactly `columns.len()` cells.
    rows: BTreeMap<RowKey, Vec<Option<f64>>>,
}

impl TimeSeriesTable {
    /// Create an empty table with the given columns.
    ///
    /// Repeated names are dropped after the first occurrence.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for c in columns {
            let c = c.into();
            if !names.contains(&c) {
                names.push(c);
            }
        }
        Self {
            columns: names,
            rows: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &RowKey> + '_ {
        self.rows.keys()
    }

    pub fn first_key(&self) -> Option<RowKey> {
        self.rows.keys().next().copied()
    }

    pub fn last_key(&self) -> Option<RowKey> {
        self.rows.keys().next_back().copied()
    }

    /// Rows in ascending key order.
    pub fn rows(&self) -> impl Iterator<Item = (&RowKey, &[Option<f64>])> + '_ {
        self.rows.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn row(&self, key: &RowKey) -> Option<&[Option<f64>]> {
        self.rows.get(key).map(|v| v.as_slice())
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Insert (or replace) a whole row.
    ///
    /// Short rows are padded with unset cells; extra cells are dropped.
    /// Returns the previous row for this key, if any.
    pub fn insert_row(
        &mut self,
        key: RowKey,
        mut values: Vec<Option<f64>>,
    ) -> Option<Vec<Option<f64>>> {
        values.resize(self.columns.len(), None);
        self.rows.insert(key, values)
    }

    /// Set one cell, creating an all-unset row for `key` if needed.
    pub fn set(&mut self, key: RowKey, column: &str, value: Option<f64>) -> Result<(), TableError> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_string()))?;
        let width = self.columns.len();
        self.rows.entry(key).or_insert_with(|| vec![None; width])[idx] = value;
        Ok(())
    }

    /// Value of one cell; `None` if the row, column or value is absent.
    pub fn get(&self, key: &RowKey, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.get(key).and_then(|row| row[idx])
    }

    /// All cells of a column in key order.
    pub fn column_values(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(column)?;
        Some(self.rows.values().map(|row| row[idx]).collect())
    }

    /// Extract a column as a [`Series`] of its present values.
    pub fn series(&self, column: &str) -> Option<Series> {
        let idx = self.column_index(column)?;
        let points = self
            .rows
            .iter()
            .filter_map(|(k, row)| row[idx].map(|v| (*k, v)))
            .collect();
        Some(Series {
            name: column.to_string(),
            points,
        })
    }

    /// Rename a column in place.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), TableError> {
        let idx = self
            .column_index(from)
            .ok_or_else(|| TableError::UnknownColumn(from.to_string()))?;
        if from != to && self.has_column(to) {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Append a column computed from each existing row, in place.
    ///
    /// The closure sees the row before the new cell is added.
    pub fn push_column<F>(&mut self, name: &str, mut compute: F) -> Result<(), TableError>
    where
        F: FnMut(&RowKey, &[Option<f64>]) -> Option<f64>,
    {
        if self.has_column(name) {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        for (key, row) in self.rows.iter_mut() {
            let value = compute(key, row.as_slice());
            row.push(value);
        }
        self.columns.push(name.to_string());
        Ok(())
    }

    /// Append `series` as a new column, left-joined on this table's keys.
    ///
    /// Keys present only in the series are ignored.
    pub fn with_series(mut self, series: &Series) -> Result<Self, TableError> {
        self.push_column(series.name(), |key, _| series.get(key))?;
        Ok(self)
    }

    /// New table with only the named columns, in the order given.
    pub fn select(&self, names: &[&str]) -> Result<Self, TableError> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| TableError::UnknownColumn(n.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (i, n) in names.iter().enumerate() {
            if names[..i].contains(n) {
                return Err(TableError::DuplicateColumn(n.to_string()));
            }
        }

        let mut out = Self::new(names.iter().copied());
        for (key, row) in &self.rows {
            out.rows
                .insert(*key, indices.iter().map(|&i| row[i]).collect());
        }
        Ok(out)
    }

    /// New table with the same columns and only the rows whose key passes `keep`.
    pub fn filter_rows<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&RowKey) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|(k, _)| keep(*k))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    /// New table with every cell passed through `f`.
    pub fn map_cells<F>(&self, mut f: F) -> Self
    where
        F: FnMut(Option<f64>) -> Option<f64>,
    {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|(k, row)| (*k, row.iter().map(|&c| f(c)).collect()))
                .collect(),
        }
    }
}

/// A single named column of present values, ordered by key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    name: String,
    points: BTreeMap<RowKey, f64>,
}

impl Series {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: BTreeMap::new(),
        }
    }

    pub fn from_points<I>(name: impl Into<String>, points: I) -> Self
    where
        I: IntoIterator<Item = (RowKey, f64)>,
    {
        Self {
            name: name.into(),
            points: points.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// One-column table holding this series.
    pub fn to_table(&self) -> TimeSeriesTable {
        let mut table = TimeSeriesTable::new([self.name.clone()]);
        for (k, v) in &self.points {
            table.insert_row(*k, vec![Some(*v)]);
        }
        table
    }

    pub fn get(&self, key: &RowKey) -> Option<f64> {
        self.points.get(key).copied()
    }

    pub fn insert(&mut self, key: RowKey, value: f64) -> Option<f64> {
        self.points.insert(key, value)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &f64)> + '_ {
        self.points.iter()
    }
}
