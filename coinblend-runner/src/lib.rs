//! coinblend runner: configuration, the end-to-end pipeline and result export.
//!
//! This crate builds on `coinblend-core` to provide:
//! - Environment settings (`.env` aware) and the TOML pipeline file
//! - The fetch → merge → index → convert → correlate pipeline
//! - CSV / JSON artifacts and terminal rendering

pub mod config;
pub mod export;
pub mod pipeline;

pub use config::{AltcoinSource, ConfigError, ExchangeSource, PipelineConfig, Settings, WindowConfig};
pub use export::{export_matrix_csv, export_summary_json, export_table_csv, render_matrix, save_report};
pub use pipeline::{run_pipeline, NamedMatrix, PipelineError, PipelineReport, SkippedSource};
