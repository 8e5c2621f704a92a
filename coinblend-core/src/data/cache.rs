//! Parquet cache layer: one file per retrieval id.
//!
//! Layout: `{cache_dir}/{cache_key}.parquet`
//!
//! Features:
//! - Filesystem-safe keys derived from the retrieval id (long ids get a BLAKE3 suffix)
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (key column present, no null or repeated keys)
//! - Quarantine for corrupt files ({filename}.quarantined)
//!
//! Entries are trusted once written: no TTL, no checksum, no invalidation.

use super::provider::FetchErrorKind;
use crate::table::{RowKey, TimeSeriesTable};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the row-key column inside a cache file.
pub const KEY_COLUMN: &str = "__key";

/// File extension of cache entries.
pub const EXTENSION: &str = "parquet";

/// Keys longer than this are truncated and suffixed with a digest.
const MAX_KEY_LEN: usize = 120;

/// Filesystem-safe cache key for a retrieval id.
///
/// Path separators and other characters that are unsafe in file names become `-`.
/// Whenever that rewrites the id, or the id is too long, a short digest of the
/// original id is appended so that distinct ids never share a file.
pub fn cache_key(retrieval_id: &str) -> String {
    let mut key: String = retrieval_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '&' | '=' | '*' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect();

    if key.is_empty() {
        key.push('_');
    }
    // No hidden files, no `.`/`..`
    if key.starts_with('.') {
        key.replace_range(0..1, "-");
    }

    if key == retrieval_id && key.len() <= MAX_KEY_LEN {
        return key;
    }

    let digest = blake3::hash(retrieval_id.as_bytes()).to_hex();
    let mut cut = key.len().min(MAX_KEY_LEN - 17);
    while !key.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &key[..cut], &digest[..16])
}

/// Summary of one cache entry on disk.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub rows: usize,
    pub columns: Vec<String>,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
}

/// The on-disk dataset cache. Owns its directory for the lifetime of the instance.
pub struct DatasetCache {
    cache_dir: PathBuf,
}

impl DatasetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the entry for a retrieval id: `{cache_dir}/{cache_key}.parquet`
    pub fn entry_path(&self, retrieval_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{EXTENSION}", cache_key(retrieval_id)))
    }

    pub fn contains(&self, retrieval_id: &str) -> bool {
        self.entry_path(retrieval_id).is_file()
    }

    /// Load the cached table for a retrieval id.
    ///
    /// Returns `None` on a miss. A file that fails to decode is quarantined
    /// and also reported as a miss, so the caller re-fetches.
    pub fn load(&self, retrieval_id: &str) -> Option<TimeSeriesTable> {
        let path = self.entry_path(retrieval_id);
        if !path.is_file() {
            return None;
        }

        match read_table(&path) {
            Ok(table) => {
                tracing::debug!(path = %path.display(), rows = table.len(), "cache hit");
                Some(table)
            }
            Err(e) => {
                let quarantine = path.with_extension(format!("{EXTENSION}.quarantined"));
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt cache file"
                );
                let _ = fs::rename(&path, &quarantine);
                None
            }
        }
    }

    /// Write a table for a retrieval id. Atomic: write to .tmp then rename.
    pub fn write(&self, retrieval_id: &str, table: &TimeSeriesTable) -> Result<PathBuf, FetchErrorKind> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| FetchErrorKind::Cache(format!("failed to create dir: {e}")))?;

        let mut df = table_to_dataframe(table)?;
        let path = self.entry_path(retrieval_id);
        let tmp_path = path.with_extension(format!("{EXTENSION}.tmp"));

        write_parquet(&mut df, &tmp_path)?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            // Clean up temp file on rename failure
            let _ = fs::remove_file(&tmp_path);
            FetchErrorKind::Cache(format!("atomic rename failed: {e}"))
        })?;

        tracing::info!(path = %path.display(), rows = table.len(), "cached dataset");
        Ok(path)
    }

    /// Describe every readable entry in the cache directory, sorted by key.
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>, FetchErrorKind> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| FetchErrorKind::Cache(format!("read dir: {e}")))?;

        let mut infos = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| FetchErrorKind::Cache(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip .tmp, .quarantined and anything else
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };

            match read_table(&path) {
                Ok(table) => infos.push(CacheEntryInfo {
                    key,
                    size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
                    rows: table.len(),
                    columns: table.columns().to_vec(),
                    first: table.first_key(),
                    last: table.last_key(),
                    path,
                }),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable cache entry"),
            }
        }

        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert a table to a Polars DataFrame: key column first, then fields in order.
fn table_to_dataframe(table: &TimeSeriesTable) -> Result<DataFrame, FetchErrorKind> {
    if table.has_column(KEY_COLUMN) {
        return Err(FetchErrorKind::Cache(format!(
            "field name '{KEY_COLUMN}' is reserved"
        )));
    }

    let keys: Vec<i64> = table
        .keys()
        .map(|k| k.and_utc().timestamp_millis())
        .collect();

    let mut columns = Vec::with_capacity(table.columns().len() + 1);
    columns.push(
        Column::new(KEY_COLUMN.into(), keys)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| FetchErrorKind::Cache(format!("key cast: {e}")))?,
    );
    for (i, name) in table.columns().iter().enumerate() {
        let values: Vec<Option<f64>> = table.rows().map(|(_, row)| row[i]).collect();
        columns.push(Column::new(name.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| FetchErrorKind::Cache(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), FetchErrorKind> {
    let file =
        fs::File::create(path).map_err(|e| FetchErrorKind::Cache(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| FetchErrorKind::Cache(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a Parquet file and rebuild the table, validating its structure.
fn read_table(path: &Path) -> Result<TimeSeriesTable, FetchErrorKind> {
    let file = fs::File::open(path).map_err(|e| FetchErrorKind::Cache(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| FetchErrorKind::Cache(format!("read: {e}")))?;
    dataframe_to_table(&df)
}

/// Convert a DataFrame back to a table.
fn dataframe_to_table(df: &DataFrame) -> Result<TimeSeriesTable, FetchErrorKind> {
    let map_err = |e: PolarsError| FetchErrorKind::Cache(format!("column read: {e}"));

    let key_col = df
        .column(KEY_COLUMN)
        .map_err(|_| FetchErrorKind::Cache(format!("missing column '{KEY_COLUMN}'")))?
        .cast(&DataType::Int64)
        .map_err(map_err)?;
    let key_ca = key_col.i64().map_err(map_err)?;

    let mut names = Vec::new();
    let mut field_cols = Vec::new();
    for col in df.get_columns() {
        if col.name().as_str() == KEY_COLUMN {
            continue;
        }
        names.push(col.name().to_string());
        field_cols.push(col.cast(&DataType::Float64).map_err(map_err)?);
    }
    let field_cas = field_cols
        .iter()
        .map(|c| c.f64().map_err(map_err))
        .collect::<Result<Vec<_>, _>>()?;

    let mut table = TimeSeriesTable::new(names);
    for i in 0..df.height() {
        let millis = key_ca
            .get(i)
            .ok_or_else(|| FetchErrorKind::Cache(format!("null key at row {i}")))?;
        let key: RowKey = DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| FetchErrorKind::Cache(format!("bad key {millis} at row {i}")))?;

        let values = field_cas.iter().map(|ca| ca.get(i)).collect();
        if table.insert_row(key, values).is_some() {
            return Err(FetchErrorKind::Cache(format!("repeated key {key} at row {i}")));
        }
    }

    Ok(table)
}
