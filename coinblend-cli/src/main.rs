//! coinblend CLI: fetch, run, and cache inspection commands.
//!
//! Commands:
//! - `fetch`: download datasets and cache them as Parquet
//! - `run`: execute the analysis pipeline from a TOML config file
//! - `cache status`: list cached entries with their row counts and date ranges

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use coinblend_core::data::{
    fetch_all, poloniex, CachedFetcher, DataProvider, DatasetCache, FetchRequest, LogProgress,
    PoloniexProvider, QuandlProvider, SyntheticProvider,
};
use coinblend_runner::{
    render_matrix, run_pipeline, save_report, PipelineConfig, PipelineReport, Settings,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "coinblend",
    version,
    about = "Blended crypto price index and cross-currency correlation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Quandl,
    Poloniex,
    Synthetic,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch datasets and cache them as Parquet.
    Fetch {
        /// Quandl dataset codes, Poloniex currency pairs, or synthetic ids.
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long, value_enum, default_value_t = ProviderKind::Quandl)]
        provider: ProviderKind,

        /// Start date (YYYY-MM-DD) for Poloniex and synthetic data.
        #[arg(long, default_value = "2015-01-01")]
        start: String,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Candle period in seconds for Poloniex.
        #[arg(long, default_value_t = 86400)]
        period: u64,

        /// Cache directory. Defaults to $COINBLEND_CACHE_DIR or ./data.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Execute the analysis pipeline from a TOML config file.
    Run {
        /// Path to the pipeline TOML file.
        #[arg(long)]
        config: PathBuf,

        /// Offline mode: cache only, no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Use the synthetic provider instead of the network.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Cache directory. Defaults to $COINBLEND_CACHE_DIR or ./data.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Output directory for CSV and JSON artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached entries with row counts and date ranges.
    Status {
        /// Cache directory. Defaults to $COINBLEND_CACHE_DIR or ./data.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Print entries as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coinblend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Fetch {
            ids,
            provider,
            start,
            end,
            period,
            cache_dir,
        } => run_fetch(ids, provider, &start, end.as_deref(), period, cache_dir),
        Commands::Run {
            config,
            offline,
            synthetic,
            cache_dir,
            output_dir,
        } => run_pipeline_cmd(&config, offline, synthetic, cache_dir, &output_dir),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir, json } => run_cache_status(cache_dir, json),
        },
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn run_fetch(
    ids: Vec<String>,
    provider: ProviderKind,
    start: &str,
    end: Option<&str>,
    period: u64,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = match end {
        Some(s) => parse_date(s)?,
        None => chrono::Utc::now().date_naive(),
    };
    if start > end {
        bail!("--start {start} is after --end {end}");
    }

    let settings = match provider {
        ProviderKind::Quandl => Settings::from_env()?,
        _ => Settings::from_env_keyless()?,
    };
    let cache = DatasetCache::new(cache_dir.unwrap_or_else(|| settings.cache_dir.clone()));

    match provider {
        ProviderKind::Quandl => {
            let quandl = QuandlProvider::new(settings.api_key()?.clone(), settings.http.clone())?;
            let requests = ids.iter().map(|id| FetchRequest::new(id, id)).collect();
            fetch_and_report(CachedFetcher::new(quandl, cache), requests)
        }
        ProviderKind::Poloniex => {
            if !poloniex::VALID_PERIODS.contains(&period) {
                bail!("--period {period} not one of {:?}", poloniex::VALID_PERIODS);
            }
            let polo = PoloniexProvider::new(settings.http.clone())?;
            let requests = ids
                .iter()
                .map(|pair| FetchRequest::new(pair, polo.chart_url(pair, start, end, period)))
                .collect();
            fetch_and_report(CachedFetcher::new(polo, cache), requests)
        }
        ProviderKind::Synthetic => {
            let requests = ids.iter().map(|id| FetchRequest::new(id, id)).collect();
            fetch_and_report(
                CachedFetcher::new(SyntheticProvider::new(start, end), cache),
                requests,
            )
        }
    }
}

fn fetch_and_report<P: DataProvider>(
    fetcher: CachedFetcher<P>,
    requests: Vec<FetchRequest>,
) -> Result<()> {
    let summary = fetch_all(&fetcher, &requests, &LogProgress);

    println!("{:<20} {:>6} {:<12} {:<12}", "Source", "Rows", "First", "Last");
    println!("{}", "-".repeat(53));
    for ds in &summary.datasets {
        let date = |k: Option<chrono::NaiveDateTime>| {
            k.map(|k| k.date().to_string()).unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<20} {:>6} {:<12} {:<12}",
            ds.source_id,
            ds.table.len(),
            date(ds.table.first_key()),
            date(ds.table.last_key()),
        );
    }

    if !summary.all_succeeded() {
        for err in &summary.errors {
            eprintln!("Error: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_pipeline_cmd(
    config_path: &Path,
    offline: bool,
    synthetic: bool,
    cache_dir: Option<PathBuf>,
    output_dir: &Path,
) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        exchanges = config.exchanges.len(),
        altcoins = config.altcoins.len(),
        offline,
        synthetic,
        "starting pipeline run"
    );
    let settings = if synthetic {
        Settings::from_env_keyless()?
    } else {
        Settings::from_env()?
    };
    let cache_dir = cache_dir.unwrap_or_else(|| settings.cache_dir.clone());

    let report = if synthetic {
        let fetcher = CachedFetcher::new(
            SyntheticProvider::new(config.start, config.end),
            DatasetCache::new(&cache_dir),
        )
        .offline(offline);
        run_pipeline(&config, &fetcher, &fetcher, &LogProgress)?
    } else {
        let quandl = QuandlProvider::new(settings.api_key()?.clone(), settings.http.clone())?;
        let polo = PoloniexProvider::new(settings.http.clone())?
            .with_base_url(&config.poloniex_base_url);
        let exchanges = CachedFetcher::new(quandl, DatasetCache::new(&cache_dir)).offline(offline);
        let altcoins = CachedFetcher::new(polo, DatasetCache::new(&cache_dir)).offline(offline);
        run_pipeline(&config, &exchanges, &altcoins, &LogProgress)?
    };

    print_summary(&report);

    let dir = save_report(&report, output_dir)?;
    println!("Artifacts saved to: {}", dir.display());

    if !report.failures.is_empty() {
        for err in &report.failures {
            eprintln!("Error: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!(
        "Exchange prices: {} rows x {} columns",
        report.exchange_prices.len(),
        report.exchange_prices.columns().len()
    );
    println!(
        "Altcoin prices:  {} rows x {} columns",
        report.altcoin_prices.len(),
        report.altcoin_prices.columns().len()
    );
    println!("Cache hits:      {}", report.cache_hits);
    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.source_id, skipped.reason);
    }
    for named in &report.correlations {
        println!();
        println!("Correlation ({}, {}):", named.label, named.matrix.method);
        print!("{}", render_matrix(&named.matrix));
    }
}

fn run_cache_status(cache_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let settings = Settings::from_env_keyless()?;
    let cache = DatasetCache::new(cache_dir.unwrap_or(settings.cache_dir));
    let entries = cache.entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Cache is empty: {}", cache.cache_dir().display());
        return Ok(());
    }

    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!("Cache: {}", cache.cache_dir().display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<48} {:>6} {:<25} {:>10}", "Key", "Rows", "Date Range", "Size");
    println!("{}", "-".repeat(92));
    for e in &entries {
        let range = match (e.first, e.last) {
            (Some(f), Some(l)) => format!("{} to {}", f.date(), l.date()),
            _ => "(empty)".into(),
        };
        println!(
            "{:<48} {:>6} {:<25} {:>10}",
            e.key,
            e.rows,
            range,
            format_size(e.size_bytes)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
