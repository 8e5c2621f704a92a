//! Integration tests for the end-to-end pipeline.
//!
//! These run the whole flow against the synthetic provider, write artifacts
//! to a scratch directory, and re-run offline from the cache.

use chrono::NaiveDate;
use coinblend_core::data::{CachedFetcher, DatasetCache, NoProgress, SyntheticProvider};
use coinblend_runner::{run_pipeline, save_report, PipelineConfig, PipelineError};

const CONFIG: &str = r#"
start = "2017-01-01"
end = "2017-03-31"
method = "spearman"

[[exchanges]]
label = "KRAKEN"
dataset = "BCHARTS/KRAKENUSD"

[[exchanges]]
label = "BITSTAMP"
dataset = "BCHARTS/BITSTAMPUSD"

[[altcoins]]
label = "ETH"
pair = "BTC_ETH"

[[altcoins]]
label = "LTC"
pair = "BTC_LTC"

[[windows]]
label = "q1"
start = "2017-01-01"
end = "2017-03-31"

[[windows]]
label = "february"
start = "2017-02-01"
end = "2017-02-28"
"#;

fn synthetic(dir: &std::path::Path) -> CachedFetcher<SyntheticProvider> {
    let start = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2017, 3, 31).unwrap();
    CachedFetcher::new(SyntheticProvider::new(start, end), DatasetCache::new(dir))
}

#[test]
fn synthetic_run_writes_artifacts() {
    let cache_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let fetcher = synthetic(cache_dir.path());

    let report = run_pipeline(&config, &fetcher, &fetcher, &NoProgress).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.exchange_prices.len(), 90);
    assert_eq!(
        report.exchange_prices.columns(),
        &["KRAKEN", "BITSTAMP", "avg_btc_price_usd"].map(String::from)
    );
    assert_eq!(
        report.altcoin_prices.columns(),
        &["BTC", "ETH", "LTC"].map(String::from)
    );

    let labels: Vec<&str> = report.correlations.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["q1", "february"]);
    for named in &report.correlations {
        assert_eq!(named.matrix.len(), 3);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(named.matrix.values[i][j], named.matrix.values[j][i]);
            }
        }
    }

    let dir = save_report(&report, out_dir.path()).unwrap();
    for file in [
        "exchange_prices.csv",
        "altcoin_prices.csv",
        "correlation_q1.csv",
        "correlation_february.csv",
        "summary.json",
    ] {
        assert!(dir.join(file).exists(), "missing {file}");
    }

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["altcoin_rows"], 90);
    assert_eq!(summary["correlations"][0]["matrix"]["method"], "spearman");
}

#[test]
fn offline_rerun_uses_cache() {
    let cache_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();

    let online = synthetic(cache_dir.path());
    let first = run_pipeline(&config, &online, &online, &NoProgress).unwrap();
    assert_eq!(first.cache_hits, 0);

    let offline = synthetic(cache_dir.path()).offline(true);
    let second = run_pipeline(&config, &offline, &offline, &NoProgress).unwrap();
    assert_eq!(second.cache_hits, 4);
    assert_eq!(first.altcoin_prices, second.altcoin_prices);
}

#[test]
fn offline_with_empty_cache_has_no_exchange_data() {
    let cache_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let offline = synthetic(cache_dir.path()).offline(true);

    let err = run_pipeline(&config, &offline, &offline, &NoProgress).unwrap_err();
    assert!(matches!(err, PipelineError::NoExchangeData { attempted: 2 }));
}
