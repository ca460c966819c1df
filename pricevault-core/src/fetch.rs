//! Fetch orchestration — bounded fan-out of the universe across the provider.
//!
//! Symbols with an existing non-empty partition are skipped before any
//! network call unless a refresh is requested. A fixed number of fetches is
//! in flight at any moment regardless of universe size; one symbol's
//! terminal failure never cancels the rest of the batch. The summary tally
//! is deterministic no matter the completion order.

use crate::provider::{FetchError, PriceProvider};
use crate::store::{PartitionStore, StoreError};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};

/// Terminal per-symbol failure recorded by the orchestrator.
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("partition write failed: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for one fetch run, passed in explicitly — the orchestrator
/// holds no global state and lives for exactly one batch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Earliest trading date requested from the provider.
    pub start_date: NaiveDate,
    /// Global cap on simultaneously in-flight fetches.
    pub max_concurrency: usize,
    /// Re-fetch symbols even when a partition already exists.
    pub refresh: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            max_concurrency: 10,
            refresh: false,
        }
    }
}

/// Deterministic tally of a fetch run.
#[derive(Debug)]
pub struct FetchSummary {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Terminal per-symbol failures, sorted by symbol for stable reporting.
    pub failures: Vec<(String, SymbolError)>,
    /// Symbols skipped because their partition already exists, in universe order.
    pub skipped_symbols: Vec<String>,
}

impl FetchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Progress callbacks for multi-symbol fetch runs.
pub trait FetchProgress: Send + Sync {
    /// Called when a symbol is skipped because its partition exists.
    fn on_skip(&self, symbol: &str);

    /// Called when a symbol's fetch is admitted (a slot freed up).
    fn on_start(&self, symbol: &str);

    /// Called when a symbol settles; `Ok` carries the row count written.
    fn on_complete(&self, symbol: &str, result: &Result<usize, SymbolError>);

    /// Called once when the whole batch has settled.
    fn on_batch_complete(&self, summary: &FetchSummary);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_skip(&self, symbol: &str) {
        println!("  SKIP: {symbol} (partition exists)");
    }

    fn on_start(&self, symbol: &str) {
        println!("Fetching {symbol}...");
    }

    fn on_complete(&self, symbol: &str, result: &Result<usize, SymbolError>) {
        match result {
            Ok(rows) => println!("  OK: {symbol} ({rows} rows)"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, summary: &FetchSummary) {
        println!(
            "\nFetch complete: {}/{} succeeded, {} skipped, {} failed",
            summary.succeeded, summary.total, summary.skipped, summary.failed
        );
    }
}

/// No-op progress reporter for library and test use.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_skip(&self, _symbol: &str) {}
    fn on_start(&self, _symbol: &str) {}
    fn on_complete(&self, _symbol: &str, _result: &Result<usize, SymbolError>) {}
    fn on_batch_complete(&self, _summary: &FetchSummary) {}
}

/// Fetch every symbol in the universe and persist each success to its
/// partition. Always runs the batch to completion; failures land in the
/// summary, not in a return error.
pub async fn fetch_universe(
    provider: &dyn PriceProvider,
    store: &PartitionStore,
    symbols: &[String],
    config: &FetchConfig,
    progress: &dyn FetchProgress,
) -> FetchSummary {
    let total = symbols.len();
    let mut skipped_symbols: Vec<String> = Vec::new();
    let mut failures: Vec<(String, SymbolError)> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for symbol in symbols {
        if config.refresh {
            // Delete up front so an interrupted refresh re-fetches the
            // symbol on the next run instead of skipping a stale partition.
            match store.remove(symbol) {
                Ok(()) => pending.push(symbol),
                Err(e) => {
                    warn!(symbol = symbol.as_str(), error = %e, "refresh removal failed");
                    failures.push((symbol.clone(), SymbolError::Store(e)));
                }
            }
        } else if store.has(symbol) {
            progress.on_skip(symbol);
            skipped_symbols.push(symbol.clone());
        } else {
            pending.push(symbol);
        }
    }

    info!(
        total,
        skipped = skipped_symbols.len(),
        pending = pending.len(),
        max_concurrency = config.max_concurrency,
        provider = provider.name(),
        "starting fetch batch"
    );

    let tasks = pending.into_iter().map(|symbol| async move {
        progress.on_start(symbol);
        let result = fetch_one(provider, store, symbol, config.start_date).await;
        progress.on_complete(symbol, &result);
        (symbol.to_string(), result)
    });

    let settled: Vec<(String, Result<usize, SymbolError>)> = stream::iter(tasks)
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    let mut succeeded = 0usize;
    for (symbol, result) in settled {
        match result {
            Ok(_) => succeeded += 1,
            Err(error) => failures.push((symbol, error)),
        }
    }

    failures.sort_by(|a, b| a.0.cmp(&b.0));

    let summary = FetchSummary {
        total,
        skipped: skipped_symbols.len(),
        succeeded,
        failed: failures.len(),
        failures,
        skipped_symbols,
    };

    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "fetch batch settled"
    );
    progress.on_batch_complete(&summary);
    summary
}

/// Fetch one symbol and write its partition.
///
/// The partition write is plain blocking I/O inside the task — the only
/// suspension points in a batch are the provider's network calls.
async fn fetch_one(
    provider: &dyn PriceProvider,
    store: &PartitionStore,
    symbol: &str,
    start: NaiveDate,
) -> Result<usize, SymbolError> {
    let bars = provider.fetch(symbol, start).await?;
    if bars.is_empty() {
        // Valid result (delisted / no data); no partition is written, so
        // the symbol will be probed again on the next run.
        info!(symbol, "provider returned no history");
        return Ok(0);
    }
    let rows = bars.len();
    store.write(symbol, &bars)?;
    Ok(rows)
}
