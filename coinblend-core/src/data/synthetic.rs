//! Synthetic provider for offline demos and tests.
//!
//! Produces a deterministic daily random walk per retrieval id. The output is
//! clearly fake: a price-like `close` column starting at 100.0 and a
//! `weightedAverage`/`Weighted Price` pair so either provider's field names
//! resolve in a pipeline config.

use super::provider::{DataProvider, FetchErrorKind};
use crate::table::{day_key, TimeSeriesTable};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticProvider {
    start: NaiveDate,
    end: NaiveDate,
}

impl SyntheticProvider {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
        tracing::warn!(id = retrieval_id, "generating synthetic data");
        Ok(random_walk(retrieval_id, self.start, self.end))
    }
}

/// Seeded random walk from 100.0, one row per calendar day in `[start, end]`.
pub fn random_walk(seed_id: &str, start: NaiveDate, end: NaiveDate) -> TimeSeriesTable {
    // Deterministic seed from the id
    let seed: [u8; 32] = *blake3::hash(seed_id.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut table = TimeSeriesTable::new(["close", "Weighted Price", "weightedAverage"]);
    let mut price = 100.0_f64;

    for date in start.iter_days().take_while(|d| *d <= end) {
        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let close = price * (1.0 + daily_return);
        let weighted = (price + close) / 2.0 * (1.0 + rng.gen_range(-0.002..0.002));
        table.insert_row(day_key(date), vec![Some(close), Some(weighted), Some(weighted)]);
        price = close;
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 3, day).unwrap()
    }

    #[test]
    fn same_id_same_walk() {
        assert_eq!(random_walk("KRAKEN", d(1), d(20)), random_walk("KRAKEN", d(1), d(20)));
        assert_ne!(random_walk("KRAKEN", d(1), d(20)), random_walk("BITSTAMP", d(1), d(20)));
    }

    #[test]
    fn one_row_per_day_all_positive() {
        let table = random_walk("X", d(1), d(10));
        assert_eq!(table.len(), 10);
        assert!(table
            .column_values("close")
            .unwrap()
            .iter()
            .all(|v| v.is_some_and(|p| p > 0.0)));
    }
}
