//! PriceVault CLI — incremental daily price store.
//!
//! Commands:
//! - `run` — fetch daily history for the universe and merge partitions into
//!   the consolidated table (`--fetch-only` / `--load-only` select one step)
//! - `query` — print the most recent rows for one symbol
//! - `status` — report partition store contents
//!
//! Per-symbol fetch failures are reported by name and do not fail the
//! process; configuration errors and a wholesale merge rejection do.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pricevault_core::{
    fetch_universe, merge_partitions, recent_history, resolve_token, FetchConfig, FetchSummary,
    MergeSummary, PartitionStore, PipelineConfig, StdoutProgress, TiingoProvider, Universe,
};

#[derive(Parser)]
#[command(name = "pricevault", about = "Incremental daily equity price store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily history and merge partitions into the consolidated table.
    Run {
        /// Fetch partitions only; skip the merge step.
        #[arg(long, conflicts_with = "load_only")]
        fetch_only: bool,

        /// Merge existing partitions only; skip fetching.
        #[arg(long)]
        load_only: bool,

        /// Universe source files (CSV with a Symbol column, or plain text).
        #[arg(long = "universe")]
        universe_files: Vec<PathBuf>,

        /// Explicit symbols (overrides --universe and the config file).
        #[arg(long = "symbols", num_args = 1..)]
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to 2000-01-01.
        #[arg(long)]
        start: Option<String>,

        /// Re-fetch symbols even if their partition exists.
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Max simultaneous in-flight fetches.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Partition directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Consolidated table path.
        #[arg(long)]
        table: Option<PathBuf>,

        /// TOML config file with pipeline defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the most recent rows for one symbol.
    Query {
        /// Ticker symbol.
        symbol: String,

        /// Number of most recent trading days to show.
        #[arg(long, default_value_t = 10)]
        days: usize,

        /// Consolidated table path.
        #[arg(long)]
        table: Option<PathBuf>,

        /// TOML config file with pipeline defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Report partition store contents (symbol, rows, date range).
    Status {
        /// Partition directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// TOML config file with pipeline defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            fetch_only,
            load_only,
            universe_files,
            symbols,
            start,
            refresh,
            concurrency,
            data_dir,
            table,
            config,
        } => {
            run_pipeline(
                fetch_only,
                load_only,
                universe_files,
                symbols,
                start,
                refresh,
                concurrency,
                data_dir,
                table,
                config,
            )
            .await
        }
        Commands::Query {
            symbol,
            days,
            table,
            config,
        } => run_query(&symbol, days, table, config),
        Commands::Status { data_dir, config } => run_status(data_dir, config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => Ok(PipelineConfig::from_file(p)?),
        None => Ok(PipelineConfig::default()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    fetch_only: bool,
    load_only: bool,
    universe_files: Vec<PathBuf>,
    symbols: Vec<String>,
    start: Option<String>,
    refresh: bool,
    concurrency: Option<usize>,
    data_dir: Option<PathBuf>,
    table: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = load_config(config.as_ref())?;
    if let Some(dir) = data_dir {
        cfg.data_dir = dir;
    }
    if let Some(path) = table {
        cfg.table_path = path;
    }
    if !universe_files.is_empty() {
        cfg.universe_files = universe_files;
    }
    if let Some(s) = &start {
        cfg.start_date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    }
    if let Some(n) = concurrency {
        cfg.max_concurrency = n;
    }

    let store = PartitionStore::new(&cfg.data_dir);

    if !load_only {
        let universe = if !symbols.is_empty() {
            Universe::from_entries(&symbols)?
        } else {
            Universe::from_files(&cfg.universe_files)?
        };

        // Credentials are resolved before any network call.
        let token = resolve_token(&cfg.token_file)?;
        let provider = TiingoProvider::new(token);

        println!(
            "Fetching {} symbols from {} (concurrency {})",
            universe.len(),
            cfg.start_date,
            cfg.max_concurrency
        );

        let fetch_config = FetchConfig {
            start_date: cfg.start_date,
            max_concurrency: cfg.max_concurrency,
            refresh,
        };
        let summary =
            fetch_universe(&provider, &store, universe.symbols(), &fetch_config, &StdoutProgress)
                .await;
        report_fetch_failures(&summary);
    }

    if !fetch_only {
        let summary = merge_partitions(&store, &cfg.table_path)?;
        print_merge_summary(&summary, &cfg.table_path);
        if summary.rejected_entirely() {
            bail!("merge rejected every partition — table not updated");
        }
    }

    Ok(())
}

fn report_fetch_failures(summary: &FetchSummary) {
    if summary.failures.is_empty() {
        return;
    }
    eprintln!("\nFailed symbols (re-run targets):");
    for (symbol, error) in &summary.failures {
        eprintln!("  {symbol}: {error}");
    }
}

fn print_merge_summary(summary: &MergeSummary, table_path: &std::path::Path) {
    println!("\nConsolidated table: {}", table_path.display());
    println!(
        "Partitions: {} loaded, {} rejected",
        summary.partitions_loaded, summary.partitions_rejected
    );
    println!(
        "Rows: {} accepted, {} rejected",
        summary.rows_accepted, summary.rows_rejected
    );
    println!("Symbols: {}", summary.symbol_count);
    println!("Total rows: {}", summary.total_rows);
    if let (Some(min), Some(max)) = (summary.min_date, summary.max_date) {
        println!("Date range: {min} to {max}");
    }
    for (symbol, reason) in &summary.rejected_partitions {
        eprintln!("Rejected partition {symbol}: {reason}");
    }
}

fn run_query(
    symbol: &str,
    days: usize,
    table: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = load_config(config.as_ref())?;
    if let Some(path) = table {
        cfg.table_path = path;
    }

    let df = recent_history(&cfg.table_path, symbol, days)?;
    if df.height() == 0 {
        println!("No rows for {symbol}");
        return Ok(());
    }
    println!("{df}");
    Ok(())
}

fn run_status(data_dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let mut cfg = load_config(config.as_ref())?;
    if let Some(dir) = data_dir {
        cfg.data_dir = dir;
    }

    let store = PartitionStore::new(&cfg.data_dir);
    let statuses = store.status()?;

    if statuses.is_empty() {
        println!("Partition store is empty: {}", cfg.data_dir.display());
        return Ok(());
    }

    println!("Partition store: {}", cfg.data_dir.display());
    println!("Symbols: {}", statuses.len());
    println!();
    println!("{:<8} {:<25} {:>10}", "Symbol", "Date Range", "Rows");
    println!("{}", "-".repeat(46));
    for s in &statuses {
        let range = match (s.start_date, s.end_date) {
            (Some(start), Some(end)) => format!("{start} to {end}"),
            _ if !s.readable => "(unreadable)".into(),
            _ => "(empty)".into(),
        };
        println!("{:<8} {:<25} {:>10}", s.symbol, range, s.rows);
    }

    Ok(())
}
