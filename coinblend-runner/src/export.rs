//! Export of pipeline results: CSV tables, CSV matrices, a JSON summary and
//! a plain-text matrix rendering for the terminal.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, NaiveTime};
use coinblend_core::analysis::CorrelationMatrix;
use coinblend_core::data::cache_key;
use coinblend_core::TimeSeriesTable;
use serde::Serialize;

use crate::pipeline::{NamedMatrix, PipelineReport, SkippedSource};

// ─── CSV export ─────────────────────────────────────────────────────

/// Daily keys print as a bare date, anything else with its time of day.
pub fn format_key(key: &NaiveDateTime) -> String {
    if key.time() == NaiveTime::MIN {
        key.date().format("%Y-%m-%d").to_string()
    } else {
        key.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Export a table as CSV: a `date` column, then one column per table column.
/// Unset cells are empty.
pub fn export_table_csv(table: &TimeSeriesTable) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["date".to_string()];
    header.extend(table.columns().iter().cloned());
    wtr.write_record(&header)?;

    for (key, row) in table.rows() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(format_key(key));
        record.extend(row.iter().map(|cell| cell.map(|v| v.to_string()).unwrap_or_default()));
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export a correlation matrix as CSV with labels on both axes.
pub fn export_matrix_csv(matrix: &CorrelationMatrix) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec![String::new()];
    header.extend(matrix.labels.iter().cloned());
    wtr.write_record(&header)?;

    for (label, row) in matrix.labels.iter().zip(&matrix.values) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|cell| cell.map(|v| format!("{v:.6}")).unwrap_or_default()));
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── JSON summary ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FailureSummary<'a> {
    source_id: &'a str,
    error: String,
}

#[derive(Debug, Serialize)]
struct ReportSummary<'a> {
    exchanges: &'a [String],
    altcoins: &'a [String],
    exchange_rows: usize,
    altcoin_rows: usize,
    cache_hits: usize,
    failures: Vec<FailureSummary<'a>>,
    skipped: &'a [SkippedSource],
    correlations: &'a [NamedMatrix],
}

/// Serialize the report's metadata and matrices to pretty JSON.
pub fn export_summary_json(report: &PipelineReport) -> Result<String> {
    let summary = ReportSummary {
        exchanges: report.exchange_prices.columns(),
        altcoins: report.altcoin_prices.columns(),
        exchange_rows: report.exchange_prices.len(),
        altcoin_rows: report.altcoin_prices.len(),
        cache_hits: report.cache_hits,
        failures: report
            .failures
            .iter()
            .map(|e| FailureSummary {
                source_id: &e.source_id,
                error: e.kind.to_string(),
            })
            .collect(),
        skipped: &report.skipped,
        correlations: &report.correlations,
    };
    serde_json::to_string_pretty(&summary).context("failed to serialize report summary")
}

// ─── Artifacts ──────────────────────────────────────────────────────

/// Write every artifact of a run into `output_dir`, creating it if needed.
///
/// Files: `exchange_prices.csv`, `altcoin_prices.csv`, one
/// `correlation_<window>.csv` per window, and `summary.json`.
pub fn save_report(report: &PipelineReport, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;

    std::fs::write(
        output_dir.join("exchange_prices.csv"),
        export_table_csv(&report.exchange_prices)?,
    )?;
    std::fs::write(
        output_dir.join("altcoin_prices.csv"),
        export_table_csv(&report.altcoin_prices)?,
    )?;

    for named in &report.correlations {
        let path = output_dir.join(format!("correlation_{}.csv", cache_key(&named.label)));
        std::fs::write(&path, export_matrix_csv(&named.matrix)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    std::fs::write(output_dir.join("summary.json"), export_summary_json(report)?)?;

    Ok(output_dir.to_path_buf())
}

// ─── Terminal rendering ─────────────────────────────────────────────

/// Fixed-width text rendering of a matrix. Undefined cells print as `-`.
pub fn render_matrix(matrix: &CorrelationMatrix) -> String {
    let width = matrix
        .labels
        .iter()
        .map(|l| l.len())
        .max()
        .unwrap_or(0)
        .max(7);

    let mut out = format!("{:width$}", "");
    for label in &matrix.labels {
        let _ = write!(out, " {label:>width$}");
    }
    out.push('\n');

    for (label, row) in matrix.labels.iter().zip(&matrix.values) {
        let _ = write!(out, "{label:width$}");
        for cell in row {
            match cell {
                Some(v) => {
                    let _ = write!(out, " {v:>width$.3}");
                }
                None => {
                    let _ = write!(out, " {:>width$}", "-");
                }
            }
        }
        out.push('\n');
    }
    out
}
