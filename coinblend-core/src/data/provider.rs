//! Data provider trait, fetched-dataset type and structured error types.
//!
//! The DataProvider trait abstracts over remote sources (Quandl datasets,
//! Poloniex chart data, synthetic walks) so the cached fetcher can treat them
//! uniformly and tests can substitute a mock.

use crate::table::TimeSeriesTable;
use thiserror::Error;

/// Why a single source could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("dataset not found")]
    NotFound,

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response contained no rows")]
    NoData,

    #[error("provider reported an error: {0}")]
    Provider(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("not cached and network access is disabled")]
    NotCached,
}

/// A failed fetch, tagged with the source it was for.
#[derive(Debug, Error)]
#[error("failed to fetch '{source_id}': {kind}")]
pub struct FetchError {
    pub source_id: String,
    #[source]
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(source_id: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
        }
    }
}

/// Where a dataset came from on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Network,
    Cache,
}

/// A fetched table tagged with its label and the identifier it was retrieved by.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDataset {
    /// Exchange or currency-pair label; becomes the merged column name.
    pub source_id: String,
    /// Query string or URL; also the cache key.
    pub retrieval_id: String,
    pub table: TimeSeriesTable,
}

impl SourceDataset {
    pub fn new(
        source_id: impl Into<String>,
        retrieval_id: impl Into<String>,
        table: TimeSeriesTable,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            retrieval_id: retrieval_id.into(),
            table,
        }
    }
}

/// Trait for remote data providers.
///
/// Implementations handle the request shape and response format of one source.
/// The cache layer sits above this trait: providers don't know about the cache.
pub trait DataProvider {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Retrieve and parse the dataset named by `retrieval_id`.
    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind>;
}

impl<P: DataProvider + ?Sized> DataProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
        (**self).fetch(retrieval_id)
    }
}

impl<P: DataProvider + ?Sized> DataProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
        (**self).fetch(retrieval_id)
    }
}

/// Progress callback for multi-source fetches.
pub trait FetchProgress {
    /// Called when starting to fetch a source.
    fn on_start(&self, source_id: &str, index: usize, total: usize);

    /// Called when a source fetch completes.
    fn on_complete(&self, source_id: &str, index: usize, total: usize, result: Result<Origin, &FetchError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, source_id: &str, index: usize, total: usize) {
        tracing::info!("[{}/{}] fetching {source_id}", index + 1, total);
    }

    fn on_complete(
        &self,
        source_id: &str,
        _index: usize,
        _total: usize,
        result: Result<Origin, &FetchError>,
    ) {
        match result {
            Ok(Origin::Cache) => tracing::info!(source = source_id, "ok (cached)"),
            Ok(Origin::Network) => tracing::info!(source = source_id, "ok (downloaded)"),
            Err(e) => tracing::warn!(source = source_id, error = %e, "skipping source"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!("fetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: Result<Origin, &FetchError>) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
}
