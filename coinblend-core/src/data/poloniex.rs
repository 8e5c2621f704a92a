//! Poloniex chart-data provider.
//!
//! The request is a URL template over currency pair, start/end unix timestamps
//! and a sampling period in seconds. The full URL is the retrieval id, so the
//! cache key captures the whole query. The response is an array of
//! time-bucketed records with an integer `date` (unix seconds) and numeric
//! OHLC-style fields.

use super::http::{HttpSettings, JsonClient};
use super::provider::{DataProvider, FetchErrorKind};
use crate::table::TimeSeriesTable;
use chrono::{DateTime, NaiveDate};

pub const DEFAULT_BASE_URL: &str = "https://poloniex.com";

/// Sampling periods accepted by `returnChartData`, in seconds.
pub const VALID_PERIODS: [u64; 6] = [300, 900, 1800, 7200, 14400, 86400];

/// Poloniex `returnChartData` provider.
pub struct PoloniexProvider {
    client: JsonClient,
    base_url: String,
}

impl PoloniexProvider {
    pub fn new(settings: HttpSettings) -> Result<Self, FetchErrorKind> {
        Ok(Self {
            client: JsonClient::new(settings)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the chart-data URL for a pair over `[start, end]` at `period_secs`.
    pub fn chart_url(&self, pair: &str, start: NaiveDate, end: NaiveDate, period_secs: u64) -> String {
        chart_url(&self.base_url, pair, start, end, period_secs)
    }
}

/// Chart-data URL against an explicit base.
pub fn chart_url(base_url: &str, pair: &str, start: NaiveDate, end: NaiveDate, period_secs: u64) -> String {
    let start_ts = start.and_hms_opt(0, 0, 0).map_or(0, |t| t.and_utc().timestamp());
    let end_ts = end.and_hms_opt(23, 59, 59).map_or(0, |t| t.and_utc().timestamp());
    format!(
        "{}/public?command=returnChartData&currencyPair={pair}&start={start_ts}&end={end_ts}&period={period_secs}",
        base_url.trim_end_matches('/')
    )
}

impl DataProvider for PoloniexProvider {
    fn name(&self) -> &str {
        "poloniex"
    }

    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
        tracing::info!(url = retrieval_id, "downloading Poloniex chart data");
        let body: serde_json::Value = self.client.get_json(retrieval_id, retrieval_id)?;
        parse_chart(body)
    }
}

/// Parse a chart-data response body into a table.
pub fn parse_chart_json(body: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FetchErrorKind::MalformedResponse(e.to_string()))?;
    parse_chart(value)
}

fn parse_chart(body: serde_json::Value) -> Result<TimeSeriesTable, FetchErrorKind> {
    let records = match body {
        serde_json::Value::Array(records) => records,
        serde_json::Value::Object(obj) => {
            let msg = obj
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unexpected object response");
            return Err(FetchErrorKind::Provider(msg.to_string()));
        }
        other => {
            return Err(FetchErrorKind::MalformedResponse(format!(
                "expected an array of records, got {other}"
            )))
        }
    };

    // Field set comes from the first record; later records may omit fields.
    let fields: Vec<String> = match records.first().and_then(|r| r.as_object()) {
        Some(first) => first.keys().filter(|k| *k != "date").cloned().collect(),
        None => Vec::new(),
    };
    let mut table = TimeSeriesTable::new(fields.iter().cloned());

    for (i, record) in records.iter().enumerate() {
        let obj = record.as_object().ok_or_else(|| {
            FetchErrorKind::MalformedResponse(format!("record {i} is not an object"))
        })?;
        let ts = obj
            .get("date")
            .and_then(|d| d.as_i64())
            .ok_or_else(|| FetchErrorKind::MalformedResponse(format!("record {i}: missing date")))?;
        // An empty range comes back as one all-zero record at date 0
        if ts == 0 {
            tracing::debug!(record = i, "skipping placeholder record");
            continue;
        }
        let key = DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| FetchErrorKind::MalformedResponse(format!("record {i}: bad timestamp {ts}")))?;

        let values = fields
            .iter()
            .map(|f| obj.get(f).and_then(|v| v.as_f64()))
            .collect();
        if table.insert_row(key, values).is_some() {
            tracing::warn!(%key, "duplicate bucket in chart data, keeping the later record");
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::day_key;

    const BODY: &str = r#"[
        {"date": 1483228800, "high": 0.0085, "low": 0.0081, "open": 0.0082, "close": 0.0084, "volume": 120.0, "quoteVolume": 14500.0, "weightedAverage": 0.00831},
        {"date": 1483315200, "high": 0.0090, "low": 0.0083, "open": 0.0084, "close": 0.0089, "volume": 150.0, "quoteVolume": 17200.0, "weightedAverage": 0.00872}
    ]"#;

    #[test]
    fn builds_chart_url() {
        let url = chart_url(
            "https://poloniex.com/",
            "BTC_ETH",
            NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2017, 1, 2).unwrap(),
            86400,
        );
        assert_eq!(
            url,
            "https://poloniex.com/public?command=returnChartData&currencyPair=BTC_ETH&start=1483228800&end=1483401599&period=86400"
        );
    }

    #[test]
    fn parses_records_keyed_by_date() {
        let table = parse_chart_json(BODY).unwrap();
        assert!(table.has_column("weightedAverage"));
        assert!(!table.has_column("date"));
        assert_eq!(table.len(), 2);

        let jan2 = day_key(NaiveDate::from_ymd_opt(2017, 1, 2).unwrap());
        assert_eq!(table.get(&jan2, "weightedAverage"), Some(0.00872));
    }

    #[test]
    fn error_object_is_provider_error() {
        let err = parse_chart_json(r#"{"error": "Invalid currency pair."}"#).unwrap_err();
        assert!(matches!(err, FetchErrorKind::Provider(ref m) if m == "Invalid currency pair."));
    }

    #[test]
    fn empty_array_is_empty_table() {
        let table = parse_chart_json("[]").unwrap();
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn zero_date_placeholder_yields_no_rows() {
        let body = r#"[{"date": 0, "high": 0, "low": 0, "open": 0, "close": 0, "volume": 0, "quoteVolume": 0, "weightedAverage": 0}]"#;
        let table = parse_chart_json(body).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.first_key(), None);
    }

    #[test]
    fn placeholder_is_never_cached() {
        use crate::data::{CachedFetcher, DatasetCache};

        struct Placeholder;
        impl DataProvider for Placeholder {
            fn name(&self) -> &str {
                "placeholder"
            }
            fn fetch(&self, _: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
                parse_chart_json(r#"[{"date": 0, "weightedAverage": 0}]"#)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let fetcher = CachedFetcher::new(Placeholder, DatasetCache::new(dir.path()));
        let err = fetcher.fetch("BTC_NEW").unwrap_err();
        assert!(matches!(err.kind, FetchErrorKind::NoData));
        assert!(!fetcher.cache().contains("BTC_NEW"));
    }
}
