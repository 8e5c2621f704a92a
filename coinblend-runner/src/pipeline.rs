//! End-to-end analysis pipeline.
//!
//! Flow: fetch exchanges → clean → merge → blended BTC/USD index →
//! fetch altcoins → clean → convert to USD → merge with the index →
//! correlate per window.
//!
//! Failed sources are collected, never fatal, except when no exchange at
//! all could be fetched: without an index nothing downstream is meaningful.

use crate::config::{ConfigError, PipelineConfig};
use coinblend_core::analysis::{add_average_column, convert_units, correlate, CorrelationMatrix};
use coinblend_core::data::{
    fetch_all, CachedFetcher, DataProvider, FetchError, FetchProgress, FetchRequest, SourceDataset,
};
use coinblend_core::{day_key, merge, MergeError, Series, TableError, TimeSeriesTable};
use serde::Serialize;
use thiserror::Error;

/// Retrieval id recorded for the index column in the altcoin table.
pub const INDEX_RETRIEVAL_ID: &str = "index";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("no exchange data: all {attempted} exchange fetches failed")]
    NoExchangeData { attempted: usize },
}

/// Correlation matrix for one named window.
#[derive(Debug, Clone, Serialize)]
pub struct NamedMatrix {
    pub label: String,
    pub matrix: CorrelationMatrix,
}

/// A fetched source that could not be used downstream.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSource {
    pub source_id: String,
    pub reason: String,
}

/// Everything a pipeline run produced.
#[derive(Debug)]
pub struct PipelineReport {
    /// One column per exchange plus the blended index column.
    pub exchange_prices: TimeSeriesTable,
    /// Index column first, then one USD column per altcoin.
    pub altcoin_prices: TimeSeriesTable,
    pub correlations: Vec<NamedMatrix>,
    /// Sources whose fetch failed.
    pub failures: Vec<FetchError>,
    /// Sources fetched but dropped before the altcoin merge.
    pub skipped: Vec<SkippedSource>,
    pub cache_hits: usize,
}

impl PipelineReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

/// Run the whole analysis.
///
/// Exchanges and altcoins come from different providers, so each gets its
/// own fetcher. Both may share a cache directory: keys never collide since
/// one side uses dataset codes and the other full URLs.
pub fn run_pipeline<E, A>(
    config: &PipelineConfig,
    exchanges: &CachedFetcher<E>,
    altcoins: &CachedFetcher<A>,
    progress: &dyn FetchProgress,
) -> Result<PipelineReport, PipelineError>
where
    E: DataProvider,
    A: DataProvider,
{
    config.validate()?;
    let windows = config.resolved_windows()?;
    let policy = config.sentinel_policy();

    // ── Step 1: exchanges ──
    let requests: Vec<FetchRequest> = config
        .exchanges
        .iter()
        .map(|e| FetchRequest::new(&e.label, &e.dataset))
        .collect();
    let exchange_summary = fetch_all(exchanges, &requests, progress);
    if exchange_summary.datasets.is_empty() {
        return Err(PipelineError::NoExchangeData {
            attempted: requests.len(),
        });
    }

    let cleaned: Vec<SourceDataset> = exchange_summary
        .datasets
        .into_iter()
        .map(|ds| {
            let table = policy.apply(&ds.table);
            SourceDataset { table, ..ds }
        })
        .collect();

    let mut exchange_prices = merge(&cleaned, &config.exchange_field)?;
    add_average_column(&mut exchange_prices, &config.index_column, true)?;
    let index = exchange_prices
        .series(&config.index_column)
        .ok_or_else(|| TableError::UnknownColumn(config.index_column.clone()))?;
    tracing::info!(
        exchanges = cleaned.len(),
        rows = exchange_prices.len(),
        points = index.len(),
        "blended BTC/USD index built"
    );

    // ── Step 2: altcoins ──
    let requests: Vec<FetchRequest> = config
        .altcoins
        .iter()
        .map(|a| FetchRequest::new(&a.label, config.altcoin_url(a)))
        .collect();
    let altcoin_summary = fetch_all(altcoins, &requests, progress);

    let mut converted = Vec::with_capacity(altcoin_summary.datasets.len() + 1);
    converted.push(SourceDataset::new(
        &config.btc_label,
        INDEX_RETRIEVAL_ID,
        index.clone().renamed(&config.altcoin_field).to_table(),
    ));

    let mut skipped = Vec::new();
    for ds in altcoin_summary.datasets {
        let table = policy.apply(&ds.table);
        let rates = daily_rates_for(&table, &index);
        match convert_units(&table, Some(&config.altcoin_field), &rates) {
            Ok(usd) => converted.push(SourceDataset { table: usd, ..ds }),
            Err(e) => {
                tracing::warn!(source = %ds.source_id, error = %e, "skipping altcoin");
                skipped.push(SkippedSource {
                    source_id: ds.source_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    let altcoin_prices = merge(&converted, &config.altcoin_field)?;

    // ── Step 3: correlations ──
    let correlations = windows
        .into_iter()
        .map(|(label, window)| {
            let matrix = correlate(&altcoin_prices, &window, config.method);
            tracing::debug!(window = %label, columns = matrix.len(), "correlated");
            NamedMatrix { label, matrix }
        })
        .collect();

    let mut failures = exchange_summary.errors;
    failures.extend(altcoin_summary.errors);

    Ok(PipelineReport {
        exchange_prices,
        altcoin_prices,
        correlations,
        failures,
        skipped,
        cache_hits: exchange_summary.cache_hits + altcoin_summary.cache_hits,
    })
}

/// Index values re-keyed onto `table`'s rows, looked up by calendar day.
///
/// The index is daily; intraday altcoin buckets all convert at their day's rate.
fn daily_rates_for(table: &TimeSeriesTable, index: &Series) -> Series {
    Series::from_points(
        index.name(),
        table
            .keys()
            .filter_map(|k| index.get(&day_key(k.date())).map(|rate| (*k, rate))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinblend_core::data::{DatasetCache, FetchErrorKind, NoProgress};
    use chrono::NaiveDate;

    struct Fixed(Vec<(&'static str, TimeSeriesTable)>);

    impl DataProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self, id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
            self.0
                .iter()
                .find(|(k, _)| id.contains(k))
                .map(|(_, t)| t.clone())
                .ok_or(FetchErrorKind::NotFound)
        }
    }

    fn table(field: &str, values: &[f64]) -> TimeSeriesTable {
        let mut t = TimeSeriesTable::new([field]);
        for (i, v) in values.iter().enumerate() {
            let date = NaiveDate::from_ymd_opt(2017, 1, 1 + i as u32).unwrap();
            t.insert_row(day_key(date), vec![Some(*v)]);
        }
        t
    }

    fn config() -> PipelineConfig {
        PipelineConfig::from_toml_str(
            r#"
start = "2017-01-01"
end = "2017-01-05"

[[exchanges]]
label = "KRAKEN"
dataset = "BCHARTS/KRAKENUSD"

[[exchanges]]
label = "GONE"
dataset = "BCHARTS/GONEUSD"

[[altcoins]]
label = "ETH"
pair = "BTC_ETH"

[[altcoins]]
label = "ODD"
pair = "BTC_ODD"
"#,
        )
        .unwrap()
    }

    #[test]
    fn failures_and_skips_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let exchanges = CachedFetcher::new(
            Fixed(vec![("KRAKEN", table("Weighted Price", &[1000.0, 1100.0, 1000.0]))]),
            DatasetCache::new(dir.path()),
        );
        let altcoins = CachedFetcher::new(
            Fixed(vec![
                ("BTC_ETH", table("weightedAverage", &[0.01, 0.011, 0.012])),
                ("BTC_ODD", table("close", &[1.0, 2.0, 3.0])),
            ]),
            DatasetCache::new(dir.path()),
        );

        let report = run_pipeline(&config(), &exchanges, &altcoins, &NoProgress).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_id, "GONE");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].source_id, "ODD");
        assert!(!report.is_complete());

        assert_eq!(
            report.altcoin_prices.columns(),
            &["BTC".to_string(), "ETH".to_string()]
        );
        let day2 = day_key(NaiveDate::from_ymd_opt(2017, 1, 2).unwrap());
        let eth = report.altcoin_prices.get(&day2, "ETH").unwrap();
        assert!((eth - 12.1).abs() < 1e-9);

        assert_eq!(report.correlations.len(), 1);
        assert_eq!(report.correlations[0].label, "all");
    }

    #[test]
    fn no_exchange_data_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let exchanges = CachedFetcher::new(Fixed(vec![]), DatasetCache::new(dir.path()));
        let altcoins = CachedFetcher::new(Fixed(vec![]), DatasetCache::new(dir.path()));

        let err = run_pipeline(&config(), &exchanges, &altcoins, &NoProgress).unwrap_err();
        assert!(matches!(err, PipelineError::NoExchangeData { attempted: 2 }));
    }

    #[test]
    fn index_column_survives_alongside_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let exchanges = CachedFetcher::new(
            Fixed(vec![("KRAKEN", table("Weighted Price", &[1000.0, 1100.0]))]),
            DatasetCache::new(dir.path()),
        );
        let altcoins = CachedFetcher::new(
            Fixed(vec![("BTC_ETH", table("weightedAverage", &[0.01, 0.02]))]),
            DatasetCache::new(dir.path()),
        );

        let report = run_pipeline(&config(), &exchanges, &altcoins, &NoProgress).unwrap();
        let day1 = day_key(NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
        assert_eq!(report.altcoin_prices.get(&day1, "BTC"), Some(1000.0));
        assert_eq!(report.altcoin_prices.get(&day1, "ETH"), Some(10.0));
    }

    #[test]
    fn intraday_buckets_convert_at_their_days_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.period_secs = 7200;

        let mut eth = TimeSeriesTable::new(["weightedAverage"]);
        for day in 1..=3 {
            for hour in [0, 2, 14] {
                let key = NaiveDate::from_ymd_opt(2017, 1, day)
                    .unwrap()
                    .and_hms_opt(hour, 0, 0)
                    .unwrap();
                eth.insert_row(key, vec![Some(0.01)]);
            }
        }

        let exchanges = CachedFetcher::new(
            Fixed(vec![("KRAKEN", table("Weighted Price", &[1000.0, 1100.0, 1200.0]))]),
            DatasetCache::new(dir.path()),
        );
        let altcoins = CachedFetcher::new(Fixed(vec![("BTC_ETH", eth)]), DatasetCache::new(dir.path()));

        let report = run_pipeline(&config, &exchanges, &altcoins, &NoProgress).unwrap();
        let values = report.altcoin_prices.column_values("ETH").unwrap();
        assert_eq!(values.iter().filter(|v| v.is_some()).count(), 9);

        let afternoon = NaiveDate::from_ymd_opt(2017, 1, 2)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let usd = report.altcoin_prices.get(&afternoon, "ETH").unwrap();
        assert!((usd - 11.0).abs() < 1e-9);
    }

    #[test]
    fn daily_rates_skip_days_without_index() {
        let index = Series::from_points(
            "idx",
            [(day_key(NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()), 1000.0)],
        );
        let mut t = TimeSeriesTable::new(["p"]);
        let noon = |d| NaiveDate::from_ymd_opt(2017, 1, d).unwrap().and_hms_opt(12, 0, 0).unwrap();
        t.insert_row(noon(1), vec![Some(1.0)]);
        t.insert_row(noon(2), vec![Some(1.0)]);

        let rates = daily_rates_for(&t, &index);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates.get(&noon(1)), Some(1000.0));
    }
}
