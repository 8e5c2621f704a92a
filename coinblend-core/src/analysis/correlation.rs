//! Relative-change transform and pairwise correlation matrices.
//!
//! Prices are compared through their day-over-day relative changes rather
//! than absolute levels, so two series that merely trend upwards together are
//! not reported as correlated. Each pair of columns is correlated over the
//! rows where both have a value (pairwise-complete), not only over rows where
//! every column is present.

use crate::table::{RowKey, TimeSeriesTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("window start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    BadDate(String),
}

/// Inclusive calendar-date range. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, WindowError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(WindowError::Inverted { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Parse `YYYY-MM-DD` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| WindowError::BadDate(s.to_string()))
        };
        Self::new(Some(parse(start)?), Some(parse(end)?))
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        let date = key.date();
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Correlation coefficient to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    /// Pearson over average ranks.
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pearson" => Ok(Self::Pearson),
            "spearman" => Ok(Self::Spearman),
            other => Err(format!("unknown correlation method '{other}' (expected pearson or spearman)")),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pearson => f.write_str("pearson"),
            Self::Spearman => f.write_str("spearman"),
        }
    }
}

/// Square, labelled, symmetric correlation matrix.
///
/// Off-diagonal cells are `None` when fewer than two pairwise-complete
/// observations exist or either side has zero variance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub method: CorrelationMethod,
    pub labels: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
    /// Pairwise-complete observation counts, same shape as `values`.
    pub observations: Vec<Vec<usize>>,
}

impl CorrelationMatrix {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Coefficient between two labelled columns.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == a)?;
        let j = self.labels.iter().position(|l| l == b)?;
        self.values[i][j]
    }
}

/// Relative change per column: `(v[t] - v[t-1]) / v[t-1]` against the previous row.
///
/// The first row, rows whose neighbour is unset, and zero denominators give unset.
pub fn pct_change(table: &TimeSeriesTable) -> TimeSeriesTable {
    let mut out = TimeSeriesTable::new(table.columns().iter().cloned());
    let mut prev: Option<&[Option<f64>]> = None;

    for (key, row) in table.rows() {
        let changes = match prev {
            None => vec![None; row.len()],
            Some(p) => row
                .iter()
                .zip(p)
                .map(|(cur, before)| match (cur, before) {
                    (Some(v), Some(b)) if *b != 0.0 => Some((v - b) / b),
                    _ => None,
                })
                .collect(),
        };
        out.insert_row(*key, changes);
        prev = Some(row);
    }

    out
}

/// Correlate every pair of columns over `window`, after the relative-change transform.
pub fn correlate(
    table: &TimeSeriesTable,
    window: &DateWindow,
    method: CorrelationMethod,
) -> CorrelationMatrix {
    let windowed = table.filter_rows(|k| window.contains(k));
    let changes = pct_change(&windowed);

    let labels = changes.columns().to_vec();
    let columns: Vec<Vec<Option<f64>>> = labels
        .iter()
        .map(|c| changes.column_values(c).unwrap_or_default())
        .collect();

    let n = labels.len();
    let mut values = vec![vec![None; n]; n];
    let mut observations = vec![vec![0usize; n]; n];

    for i in 0..n {
        values[i][i] = Some(1.0);
        observations[i][i] = columns[i].iter().filter(|v| v.is_some()).count();

        for j in (i + 1)..n {
            let (xs, ys) = pairwise_complete(&columns[i], &columns[j]);
            let r = match method {
                CorrelationMethod::Pearson => pearson(&xs, &ys),
                CorrelationMethod::Spearman => pearson(&average_ranks(&xs), &average_ranks(&ys)),
            };
            values[i][j] = r;
            values[j][i] = r;
            observations[i][j] = xs.len();
            observations[j][i] = xs.len();
        }
    }

    tracing::debug!(
        columns = n,
        rows = changes.len(),
        %method,
        "computed correlation matrix"
    );

    CorrelationMatrix {
        method,
        labels,
        values,
        observations,
    }
}

// ─── Statistics helpers ─────────────────────────────────────────────

/// Values at rows where both columns are present and finite.
fn pairwise_complete(a: &[Option<f64>], b: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    a.iter()
        .zip(b)
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((*x, *y)),
            _ => None,
        })
        .unzip()
}

/// Pearson's r, clamped to [-1, 1]. `None` for n < 2 or zero variance.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let (mut sxy, mut sxx, mut syy) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    // Spread below rounding noise counts as constant
    let flat = |spread: f64, values: &[f64]| {
        spread <= FLAT_RELATIVE_VARIANCE * values.iter().map(|v| v * v).sum::<f64>()
    };
    if flat(sxx, xs) || flat(syy, ys) {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Sum of squared deviations at or below this fraction of the sum of squares
/// is treated as zero variance (a relative spread of about 1e-12).
const FLAT_RELATIVE_VARIANCE: f64 = 1e-24;

/// 1-based ranks with ties sharing their average rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share rank
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}
