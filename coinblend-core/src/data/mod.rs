//! Data providers, on-disk caching and cached fetching

pub mod cache;
pub mod fetcher;
pub mod http;
pub mod poloniex;
pub mod provider;
pub mod quandl;
pub mod synthetic;

pub use cache::{cache_key, CacheEntryInfo, DatasetCache};
pub use fetcher::{fetch_all, CachedFetcher, FetchRequest, FetchSummary};
pub use http::{HttpSettings, JsonClient};
pub use poloniex::PoloniexProvider;
pub use provider::{
    DataProvider, FetchError, FetchErrorKind, FetchProgress, LogProgress, NoProgress, Origin,
    SourceDataset,
};
pub use quandl::{ApiKey, QuandlProvider};
pub use synthetic::SyntheticProvider;
