//! Cached fetcher and batch fetch orchestration.
//!
//! The fetcher checks the cache before every network call and writes exactly
//! one entry per retrieval id on first success. A valid entry is never
//! overwritten. Batch fetches never abort: failures are collected next to the
//! successes so callers can carry on with whatever subset arrived.

use super::cache::DatasetCache;
use super::provider::{
    DataProvider, FetchError, FetchErrorKind, FetchProgress, Origin, SourceDataset,
};

/// Provider + cache pair. Cache lifetime is scoped to this instance.
pub struct CachedFetcher<P> {
    provider: P,
    cache: DatasetCache,
    offline: bool,
}

impl<P: DataProvider> CachedFetcher<P> {
    pub fn new(provider: P, cache: DatasetCache) -> Self {
        Self {
            provider,
            cache,
            offline: false,
        }
    }

    /// Never touch the network; a cache miss becomes `FetchErrorKind::NotCached`.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch a dataset labelled by its own retrieval id.
    pub fn fetch(&self, retrieval_id: &str) -> Result<SourceDataset, FetchError> {
        self.fetch_as(retrieval_id, retrieval_id)
    }

    /// Fetch `retrieval_id` and label the result `source_id`.
    pub fn fetch_as(&self, source_id: &str, retrieval_id: &str) -> Result<SourceDataset, FetchError> {
        self.fetch_with_origin(source_id, retrieval_id)
            .map(|(dataset, _)| dataset)
    }

    /// Like [`fetch_as`](Self::fetch_as), also reporting whether the cache answered.
    pub fn fetch_with_origin(
        &self,
        source_id: &str,
        retrieval_id: &str,
    ) -> Result<(SourceDataset, Origin), FetchError> {
        // Step 1: Try cache
        if let Some(table) = self.cache.load(retrieval_id) {
            return Ok((
                SourceDataset::new(source_id, retrieval_id, table),
                Origin::Cache,
            ));
        }

        // Step 2: Network, unless offline
        if self.offline {
            return Err(FetchError::new(source_id, FetchErrorKind::NotCached));
        }

        let table = self
            .provider
            .fetch(retrieval_id)
            .map_err(|kind| FetchError::new(source_id, kind))?;
        if table.is_empty() {
            return Err(FetchError::new(source_id, FetchErrorKind::NoData));
        }

        // Step 3: Persist
        self.cache
            .write(retrieval_id, &table)
            .map_err(|kind| FetchError::new(source_id, kind))?;

        Ok((
            SourceDataset::new(source_id, retrieval_id, table),
            Origin::Network,
        ))
    }
}

/// One source to fetch: its label and the id it is retrieved by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source_id: String,
    pub retrieval_id: String,
}

impl FetchRequest {
    pub fn new(source_id: impl Into<String>, retrieval_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            retrieval_id: retrieval_id.into(),
        }
    }
}

/// Outcome of a batch fetch.
#[derive(Debug, Default)]
pub struct FetchSummary {
    /// Successful datasets, in request order.
    pub datasets: Vec<SourceDataset>,
    pub errors: Vec<FetchError>,
    /// How many successes came from the cache.
    pub cache_hits: usize,
}

impl FetchSummary {
    pub fn total(&self) -> usize {
        self.datasets.len() + self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fetch every request in order, collecting successes and failures.
pub fn fetch_all<P: DataProvider>(
    fetcher: &CachedFetcher<P>,
    requests: &[FetchRequest],
    progress: &dyn FetchProgress,
) -> FetchSummary {
    let total = requests.len();
    let mut summary = FetchSummary::default();

    for (i, req) in requests.iter().enumerate() {
        progress.on_start(&req.source_id, i, total);

        match fetcher.fetch_with_origin(&req.source_id, &req.retrieval_id) {
            Ok((dataset, origin)) => {
                progress.on_complete(&req.source_id, i, total, Ok(origin));
                if origin == Origin::Cache {
                    summary.cache_hits += 1;
                }
                summary.datasets.push(dataset);
            }
            Err(e) => {
                progress.on_complete(&req.source_id, i, total, Err(&e));
                summary.errors.push(e);
            }
        }
    }

    progress.on_batch_complete(summary.datasets.len(), summary.errors.len(), total);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::NoProgress;
    use crate::table::{day_key, TimeSeriesTable};
    use chrono::NaiveDate;
    use std::cell::Cell;

    /// Provider that counts calls and fails for ids starting with "fail".
    struct CountingProvider {
        calls: Cell<usize>,
    }

    impl DataProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(&self, retrieval_id: &str) -> Result<TimeSeriesTable, FetchErrorKind> {
            self.calls.set(self.calls.get() + 1);
            if retrieval_id.starts_with("fail") {
                return Err(FetchErrorKind::Http { status: 500 });
            }
            if retrieval_id.starts_with("empty") {
                return Ok(TimeSeriesTable::new(["price"]));
            }
            let mut t = TimeSeriesTable::new(["price"]);
            t.insert_row(
                day_key(NaiveDate::from_ymd_opt(2017, 6, 1).unwrap()),
                vec![Some(2400.5)],
            );
            Ok(t)
        }
    }

    fn fetcher(dir: &std::path::Path) -> CachedFetcher<CountingProvider> {
        CachedFetcher::new(
            CountingProvider { calls: Cell::new(0) },
            DatasetCache::new(dir),
        )
    }

    #[test]
    fn second_fetch_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());

        let first = f.fetch("BCHARTS/KRAKENUSD").unwrap();
        let second = f.fetch("BCHARTS/KRAKENUSD").unwrap();

        assert_eq!(f.provider().calls.get(), 1);
        assert_eq!(first, second);
        assert!(f.cache().contains("BCHARTS/KRAKENUSD"));
    }

    #[test]
    fn failure_names_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());

        let err = f.fetch_as("KRAKEN", "fail/x").unwrap_err();
        assert_eq!(err.source_id, "KRAKEN");
        assert!(matches!(err.kind, FetchErrorKind::Http { status: 500 }));
        assert!(err.to_string().contains("KRAKEN"));
        assert!(!f.cache().contains("fail/x"));
    }

    #[test]
    fn empty_response_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());

        let err = f.fetch("empty").unwrap_err();
        assert!(matches!(err.kind, FetchErrorKind::NoData));
        assert!(!f.cache().contains("empty"));
    }

    #[test]
    fn offline_miss_does_not_call_provider() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path()).offline(true);

        let err = f.fetch("anything").unwrap_err();
        assert!(matches!(err.kind, FetchErrorKind::NotCached));
        assert_eq!(f.provider().calls.get(), 0);
    }

    #[test]
    fn batch_keeps_partial_success_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let requests = vec![
            FetchRequest::new("A", "a"),
            FetchRequest::new("B", "fail-b"),
            FetchRequest::new("C", "c"),
        ];

        let summary = fetch_all(&f, &requests, &NoProgress);
        assert_eq!(summary.total(), 3);
        assert!(!summary.all_succeeded());
        let ids: Vec<&str> = summary.datasets.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(summary.errors[0].source_id, "B");

        let again = fetch_all(&f, &requests, &NoProgress);
        assert_eq!(again.cache_hits, 2);
    }
}
