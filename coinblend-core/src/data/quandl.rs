//! Quandl dataset provider.
//!
//! Resolves a dataset code such as `BCHARTS/KRAKENUSD` through the v3 datasets
//! endpoint. The response is a column-name header plus row arrays whose first
//! cell is the ISO date; every other column becomes a numeric field.

use super::http::{HttpSettings, JsonClient};
use super::provider::{DataProvider, FetchErrorKind};
use crate::table::{day_key, TimeSeriesTable};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_BASE_URL: &str = "https://www.quandl.com";

/// Static API credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatasetResponse {
    dataset: Option<Dataset>,
    quandl_error: Option<QuandlError>,
}

#[derive(Debug, Deserialize)]
struct QuandlError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    column_names: Vec<String>,
    data: Vec<Vec<serde_json::Value>>,
}

/// Quandl historical-price provider.
pub struct QuandlProvider {
    client: JsonClient,
    api_key: ApiKey,
    base_url: String,
}

impl QuandlProvider {
    pub fn new(api_key: ApiKey, settings: HttpSettings) -> Result<Self, FetchErrorKind> {
        Ok(Self {
            client: JsonClient::new(settings)?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn dataset_url(&self, code: &str) -> String {
        format!(
            "{}/api/v3/datasets/{code}.json?api_key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key.expose()
        )
    }
}

impl DataProvider for QuandlProvider {
    fn name(&self) -> &str {
        "quandl"
    }

    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
        tracing::info!(dataset = retrieval_id, "downloading Quandl dataset");
        let resp: DatasetResponse = self
            .client
            .get_json(&self.dataset_url(retrieval_id), retrieval_id)?;
        parse_dataset(resp)
    }
}

/// Parse a datasets-endpoint response body into a table.
pub fn parse_dataset_json(body: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
    let resp: DatasetResponse = serde_json::from_str(body)
        .map_err(|e| FetchErrorKind::MalformedResponse(e.to_string()))?;
    parse_dataset(resp)
}

pub(crate) fn parse_dataset(resp: DatasetResponse) -> Result<TimeSeriesTable, FetchErrorKind> {
    let dataset = match (resp.dataset, resp.quandl_error) {
        (Some(ds), _) => ds,
        (None, Some(err)) => {
            return Err(FetchErrorKind::Provider(format!("{}: {}", err.code, err.message)))
        }
        (None, None) => {
            return Err(FetchErrorKind::MalformedResponse(
                "no dataset and no error in response".into(),
            ))
        }
    };

    if dataset.column_names.len() < 2 {
        return Err(FetchErrorKind::MalformedResponse(format!(
            "expected a date column and at least one field, got {:?}",
            dataset.column_names
        )));
    }

    let fields = &dataset.column_names[1..];
    let mut table = TimeSeriesTable::new(fields.iter().cloned());

    for (i, row) in dataset.data.iter().enumerate() {
        let date_str = row
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| FetchErrorKind::MalformedResponse(format!("row {i}: missing date")))?;
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
            FetchErrorKind::MalformedResponse(format!("row {i}: bad date '{date_str}': {e}"))
        })?;

        let values = row[1..]
            .iter()
            .map(|cell| cell_value(cell, i))
            .collect::<Result<Vec<_>, _>>()?;

        if table.insert_row(day_key(date), values).is_some() {
            tracing::warn!(%date, "duplicate date in Quandl response, keeping the later row");
        }
    }

    Ok(table)
}

fn cell_value(cell: &serde_json::Value, row: usize) -> Result<Option<f64>, FetchErrorKind> {
    match cell {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64()),
        serde_json::Value::String(s) => s.parse::<f64>().map(Some).map_err(|_| {
            FetchErrorKind::MalformedResponse(format!("row {row}: non-numeric cell '{s}'"))
        }),
        other => Err(FetchErrorKind::MalformedResponse(format!(
            "row {row}: unexpected cell {other}"
        ))),
    }
}
