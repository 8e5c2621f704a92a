//! Configuration: environment settings and the TOML pipeline file.
//!
//! Settings hold what belongs to the machine (API key, cache directory, HTTP
//! behaviour) and come from the environment. The pipeline file holds what
//! belongs to the analysis (which sources, which fields, which windows).

use chrono::NaiveDate;
use coinblend_core::analysis::{CorrelationMethod, DateWindow, SentinelPolicy};
use coinblend_core::data::poloniex::{self, VALID_PERIODS};
use coinblend_core::data::{ApiKey, HttpSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_VAR: &str = "QUANDL_API_KEY";
pub const CACHE_DIR_VAR: &str = "COINBLEND_CACHE_DIR";
pub const TIMEOUT_VAR: &str = "COINBLEND_HTTP_TIMEOUT_SECS";
pub const RETRIES_VAR: &str = "COINBLEND_MAX_RETRIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key: set QUANDL_API_KEY in the environment or .env")]
    MissingApiKey,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ─── Environment settings ───────────────────────────────────────────

/// Machine-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    api_key: Option<ApiKey>,
    pub cache_dir: PathBuf,
    pub http: HttpSettings,
}

impl Settings {
    /// Load `.env`, then read settings. The API key is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok(), true)
    }

    /// Like [`from_env`](Self::from_env) but tolerates a missing API key
    /// (offline or synthetic runs).
    pub fn from_env_keyless() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok(), false)
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(get: F, require_key: bool) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = get(API_KEY_VAR)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(ApiKey::new);
        if require_key && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let cache_dir = get(CACHE_DIR_VAR)
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        let mut http = HttpSettings::default();
        if let Some(raw) = get(TIMEOUT_VAR) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{TIMEOUT_VAR}='{raw}' is not a number")))?;
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{TIMEOUT_VAR} must be > 0")));
            }
            http.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get(RETRIES_VAR) {
            http.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{RETRIES_VAR}='{raw}' is not a number")))?;
        }

        Ok(Self {
            api_key,
            cache_dir,
            http,
        })
    }

    pub fn api_key(&self) -> Result<&ApiKey, ConfigError> {
        self.api_key.as_ref().ok_or(ConfigError::MissingApiKey)
    }
}

// ─── Pipeline file ──────────────────────────────────────────────────

/// A Quandl exchange dataset, e.g. `KRAKEN` → `BCHARTS/KRAKENUSD`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeSource {
    pub label: String,
    pub dataset: String,
}

/// A Poloniex currency pair quoted in BTC, e.g. `ETH` → `BTC_ETH`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AltcoinSource {
    pub label: String,
    pub pair: String,
}

/// A named correlation window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    pub label: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl WindowConfig {
    pub fn window(&self) -> Result<DateWindow, ConfigError> {
        DateWindow::new(self.start, self.end)
            .map_err(|e| ConfigError::Invalid(format!("window '{}': {e}", self.label)))
    }
}

/// Serializable pipeline description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub exchanges: Vec<ExchangeSource>,

    #[serde(default)]
    pub altcoins: Vec<AltcoinSource>,

    /// Field merged across exchanges.
    #[serde(default = "default_exchange_field")]
    pub exchange_field: String,

    /// Field of each altcoin dataset holding its BTC-denominated price.
    #[serde(default = "default_altcoin_field")]
    pub altcoin_field: String,

    /// Name of the blended BTC/USD column.
    #[serde(default = "default_index_column")]
    pub index_column: String,

    /// Label of the BTC column in the altcoin comparison table.
    #[serde(default = "default_btc_label")]
    pub btc_label: String,

    /// Altcoin history range requested from Poloniex.
    pub start: NaiveDate,
    pub end: NaiveDate,

    #[serde(default = "default_period")]
    pub period_secs: u64,

    #[serde(default = "default_poloniex_base")]
    pub poloniex_base_url: String,

    #[serde(default = "default_true")]
    pub strip_zeros: bool,

    #[serde(default)]
    pub method: CorrelationMethod,

    /// Correlation windows. Empty means one unbounded window.
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
}

fn default_exchange_field() -> String {
    "Weighted Price".into()
}
fn default_altcoin_field() -> String {
    "weightedAverage".into()
}
fn default_index_column() -> String {
    "avg_btc_price_usd".into()
}
fn default_btc_label() -> String {
    "BTC".into()
}
fn default_period() -> u64 {
    86400
}
fn default_poloniex_base() -> String {
    poloniex::DEFAULT_BASE_URL.into()
}
fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Load and validate a TOML pipeline file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchanges.is_empty() {
            return Err(ConfigError::Invalid("at least one exchange is required".into()));
        }
        check_unique("exchange", self.exchanges.iter().map(|e| e.label.as_str()))?;
        check_unique(
            "altcoin",
            self.altcoins
                .iter()
                .map(|a| a.label.as_str())
                .chain(std::iter::once(self.btc_label.as_str())),
        )?;
        if self.exchanges.iter().any(|e| e.label == self.index_column) {
            return Err(ConfigError::Invalid(format!(
                "exchange label '{}' clashes with the index column",
                self.index_column
            )));
        }
        if self.start > self.end {
            return Err(ConfigError::Invalid(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if !VALID_PERIODS.contains(&self.period_secs) {
            return Err(ConfigError::Invalid(format!(
                "period_secs {} not one of {VALID_PERIODS:?}",
                self.period_secs
            )));
        }
        check_unique("window", self.windows.iter().map(|w| w.label.as_str()))?;
        for w in &self.windows {
            w.window()?;
        }
        Ok(())
    }

    pub fn sentinel_policy(&self) -> SentinelPolicy {
        if self.strip_zeros {
            SentinelPolicy::StripZeros
        } else {
            SentinelPolicy::Keep
        }
    }

    /// Windows to correlate over, with an unbounded default.
    pub fn resolved_windows(&self) -> Result<Vec<(String, DateWindow)>, ConfigError> {
        if self.windows.is_empty() {
            return Ok(vec![("all".to_string(), DateWindow::unbounded())]);
        }
        self.windows
            .iter()
            .map(|w| Ok((w.label.clone(), w.window()?)))
            .collect()
    }

    /// Poloniex chart-data URL for one altcoin.
    pub fn altcoin_url(&self, altcoin: &AltcoinSource) -> String {
        poloniex::chart_url(
            &self.poloniex_base_url,
            &altcoin.pair,
            self.start,
            self.end,
            self.period_secs,
        )
    }
}

fn check_unique<'a>(kind: &str, labels: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for label in labels {
        if label.is_empty() {
            return Err(ConfigError::Invalid(format!("{kind} label must not be empty")));
        }
        if !seen.insert(label) {
            return Err(ConfigError::Invalid(format!("duplicate {kind} label '{label}'")));
        }
    }
    Ok(())
}
