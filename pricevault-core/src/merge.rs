//! Consolidated-table merge — replace-by-symbol load of all partitions.
//!
//! Scans the partition store, validates each partition's rows, and rebuilds
//! `fact_price_daily.parquet` so every (ticker, dt) pair present in any
//! partition appears exactly once with that partition's current values.
//! Re-running the merge over unchanged partitions reproduces the identical
//! table. The table file is replaced atomically (tmp + rename), so a reader
//! never observes a half-merged state.

use crate::provider::PriceBar;
use crate::store::{self, PartitionStore, StoreError};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Default file name of the consolidated table.
pub const TABLE_FILE: &str = "fact_price_daily.parquet";

/// Errors that abort the whole load step. Per-partition problems never
/// surface here — they are counted in the summary instead.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("partition scan failed: {0}")]
    Scan(String),

    #[error("consolidated table I/O error: {0}")]
    TableIo(String),
}

/// Outcome statistics of one merge run.
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub partitions_loaded: usize,
    pub partitions_rejected: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    /// Rejected partitions with the reason, sorted by symbol.
    pub rejected_partitions: Vec<(String, String)>,
    pub symbol_count: usize,
    pub total_rows: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl MergeSummary {
    /// True when partitions were found but none of them could be loaded.
    pub fn rejected_entirely(&self) -> bool {
        self.partitions_loaded == 0 && self.partitions_rejected > 0
    }
}

/// Merge every partition in the store into the consolidated table at
/// `table_path`.
///
/// Merged symbols replace their prior table rows wholesale; symbols only
/// present in the existing table are carried over untouched. The merge is
/// sequential, blocking work — it runs after a fetch batch has settled.
pub fn merge_partitions(
    store: &PartitionStore,
    table_path: &Path,
) -> Result<MergeSummary, MergeError> {
    let partitions = store
        .partitions()
        .map_err(|e| MergeError::Scan(e.to_string()))?;

    let mut summary = MergeSummary::default();

    // Existing rows, keyed by ticker. Replace-by-symbol happens on insert.
    let mut table: BTreeMap<String, Vec<PriceBar>> = if table_path.exists() {
        read_table(table_path)?
    } else {
        BTreeMap::new()
    };

    if partitions.is_empty() {
        info!(
            data_dir = %store.data_dir().display(),
            "no partitions found, nothing to merge"
        );
        finalize_stats(&table, &mut summary);
        return Ok(summary);
    }

    for (symbol, path) in partitions {
        match load_partition_rows(&path) {
            Ok((rows, rejected)) => {
                summary.partitions_loaded += 1;
                summary.rows_accepted += rows.len();
                summary.rows_rejected += rejected;
                if rejected > 0 {
                    warn!(symbol = symbol.as_str(), rejected, "rejected invalid rows");
                }
                table.insert(symbol, rows);
            }
            Err(e) => {
                warn!(symbol = symbol.as_str(), error = %e, "rejecting partition");
                summary.partitions_rejected += 1;
                summary.rejected_partitions.push((symbol, e.to_string()));
            }
        }
    }
    summary.rejected_partitions.sort_by(|a, b| a.0.cmp(&b.0));

    write_table(&table, table_path)?;
    finalize_stats(&table, &mut summary);

    info!(
        partitions = summary.partitions_loaded,
        rejected_partitions = summary.partitions_rejected,
        rows = summary.total_rows,
        symbols = summary.symbol_count,
        "merge complete"
    );
    Ok(summary)
}

/// Read one partition and validate row-by-row.
///
/// Returns the accepted rows (date-ascending, one per date) and the count
/// of rejected rows. A row is rejected when its date is null, any price
/// field is null or non-finite, or its volume is null.
fn load_partition_rows(path: &Path) -> Result<(Vec<PriceBar>, usize), StoreError> {
    let df = store::read_partition_df(path)?;

    let type_err = |field: &str, e: PolarsError| {
        StoreError::Validation(format!("{field} column type: {e}"))
    };
    let col_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));

    let date_ca = df.column("date").map_err(col_err)?.date().map_err(|e| type_err("date", e))?;
    let open_ca = df.column("open").map_err(col_err)?.f64().map_err(|e| type_err("open", e))?;
    let high_ca = df.column("high").map_err(col_err)?.f64().map_err(|e| type_err("high", e))?;
    let low_ca = df.column("low").map_err(col_err)?.f64().map_err(|e| type_err("low", e))?;
    let close_ca = df.column("close").map_err(col_err)?.f64().map_err(|e| type_err("close", e))?;
    let adj_ca = df
        .column("adj_close")
        .map_err(col_err)?
        .f64()
        .map_err(|e| type_err("adj_close", e))?;
    let vol_ca = df
        .column("volume")
        .map_err(col_err)?
        .u64()
        .map_err(|e| type_err("volume", e))?;

    let epoch = store::epoch();
    let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
    let mut rejected = 0usize;

    for i in 0..df.height() {
        let (Some(days), Some(open), Some(high), Some(low), Some(close), Some(adj), Some(volume)) = (
            date_ca.get(i),
            open_ca.get(i),
            high_ca.get(i),
            low_ca.get(i),
            close_ca.get(i),
            adj_ca.get(i),
            vol_ca.get(i),
        ) else {
            rejected += 1;
            continue;
        };
        if ![open, high, low, close, adj].iter().all(|v| v.is_finite()) {
            rejected += 1;
            continue;
        }

        let date = epoch + chrono::Duration::days(days as i64);
        // Duplicate dates inside a partition should not happen; keep the
        // last occurrence so a re-fetched row wins.
        by_date.insert(
            date,
            PriceBar {
                date,
                open,
                high,
                low,
                close,
                adj_close: adj,
                volume,
            },
        );
    }

    Ok((by_date.into_values().collect(), rejected))
}

/// Read the existing consolidated table back into per-ticker rows.
fn read_table(path: &Path) -> Result<BTreeMap<String, Vec<PriceBar>>, MergeError> {
    let io_err = |e: String| MergeError::TableIo(e);

    let file = fs::File::open(path).map_err(|e| io_err(format!("open table: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| io_err(format!("read table: {e}")))?;

    let ticker_ca = df
        .column("ticker")
        .and_then(|c| c.str())
        .map_err(|e| io_err(format!("ticker column: {e}")))?;
    let dt_ca = df
        .column("dt")
        .and_then(|c| c.date())
        .map_err(|e| io_err(format!("dt column: {e}")))?;
    let open_ca = df
        .column("open")
        .and_then(|c| c.f64())
        .map_err(|e| io_err(format!("open column: {e}")))?;
    let high_ca = df
        .column("high")
        .and_then(|c| c.f64())
        .map_err(|e| io_err(format!("high column: {e}")))?;
    let low_ca = df
        .column("low")
        .and_then(|c| c.f64())
        .map_err(|e| io_err(format!("low column: {e}")))?;
    let close_ca = df
        .column("close")
        .and_then(|c| c.f64())
        .map_err(|e| io_err(format!("close column: {e}")))?;
    let adj_ca = df
        .column("adj_close")
        .and_then(|c| c.f64())
        .map_err(|e| io_err(format!("adj_close column: {e}")))?;
    let vol_ca = df
        .column("volume")
        .and_then(|c| c.u64())
        .map_err(|e| io_err(format!("volume column: {e}")))?;

    let epoch = store::epoch();
    let mut table: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();

    for i in 0..df.height() {
        let (Some(ticker), Some(days), Some(open), Some(high), Some(low), Some(close), Some(adj), Some(volume)) = (
            ticker_ca.get(i),
            dt_ca.get(i),
            open_ca.get(i),
            high_ca.get(i),
            low_ca.get(i),
            close_ca.get(i),
            adj_ca.get(i),
            vol_ca.get(i),
        ) else {
            // We wrote this table; a null key here means outside corruption.
            // Drop the row rather than poisoning the rebuild.
            continue;
        };
        table.entry(ticker.to_string()).or_default().push(PriceBar {
            date: epoch + chrono::Duration::days(days as i64),
            open,
            high,
            low,
            close,
            adj_close: adj,
            volume,
        });
    }

    for rows in table.values_mut() {
        rows.sort_by_key(|b| b.date);
    }
    Ok(table)
}

/// Write the consolidated table atomically (tmp + rename).
fn write_table(
    table: &BTreeMap<String, Vec<PriceBar>>,
    table_path: &Path,
) -> Result<(), MergeError> {
    if let Some(parent) = table_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| MergeError::TableIo(format!("create table dir: {e}")))?;
        }
    }

    let total: usize = table.values().map(|rows| rows.len()).sum();
    let mut tickers: Vec<String> = Vec::with_capacity(total);
    let mut dts: Vec<i32> = Vec::with_capacity(total);
    let mut opens: Vec<f64> = Vec::with_capacity(total);
    let mut highs: Vec<f64> = Vec::with_capacity(total);
    let mut lows: Vec<f64> = Vec::with_capacity(total);
    let mut closes: Vec<f64> = Vec::with_capacity(total);
    let mut adj_closes: Vec<f64> = Vec::with_capacity(total);
    let mut volumes: Vec<u64> = Vec::with_capacity(total);

    // BTreeMap iteration gives (ticker, dt) order for free.
    for (ticker, rows) in table {
        for bar in rows {
            tickers.push(ticker.clone());
            dts.push(store::date_to_days(bar.date));
            opens.push(bar.open);
            highs.push(bar.high);
            lows.push(bar.low);
            closes.push(bar.close);
            adj_closes.push(bar.adj_close);
            volumes.push(bar.volume);
        }
    }

    let df = DataFrame::new(vec![
        Column::new("ticker".into(), tickers),
        Column::new("dt".into(), dts)
            .cast(&DataType::Date)
            .map_err(|e| MergeError::TableIo(format!("dt cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| MergeError::TableIo(format!("table dataframe: {e}")))?;

    let tmp_path = table_path.with_extension("parquet.tmp");
    store::write_parquet(&df, &tmp_path).map_err(|e| MergeError::TableIo(e.to_string()))?;
    fs::rename(&tmp_path, table_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        MergeError::TableIo(format!("atomic rename failed: {e}"))
    })?;

    Ok(())
}

/// Fill the table-level statistics of the summary.
fn finalize_stats(table: &BTreeMap<String, Vec<PriceBar>>, summary: &mut MergeSummary) {
    summary.symbol_count = table.values().filter(|rows| !rows.is_empty()).count();
    summary.total_rows = table.values().map(|rows| rows.len()).sum();
    summary.min_date = table
        .values()
        .filter_map(|rows| rows.first().map(|b| b.date))
        .min();
    summary.max_date = table
        .values()
        .filter_map(|rows| rows.last().map(|b| b.date))
        .max();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("pricevault_merge_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn bars(start_day: u32, n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| PriceBar {
                date: NaiveDate::from_ymd_opt(2024, 1, start_day).unwrap()
                    + chrono::Duration::days(i as i64),
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                adj_close: 100.5 + i as f64,
                volume: 1_000 + i as u64,
            })
            .collect()
    }

    fn read_rows(table_path: &Path) -> BTreeMap<String, Vec<PriceBar>> {
        read_table(table_path).unwrap()
    }

    #[test]
    fn merges_partitions_into_one_table() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        store.write("AAPL", &bars(2, 3)).unwrap();
        store.write("MSFT", &bars(2, 2)).unwrap();

        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.partitions_loaded, 2);
        assert_eq!(summary.rows_accepted, 5);
        assert_eq!(summary.rows_rejected, 0);
        assert_eq!(summary.symbol_count, 2);
        assert_eq!(summary.total_rows, 5);
        assert_eq!(
            summary.min_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
        assert_eq!(
            summary.max_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap())
        );

        let rows = read_rows(&table_path);
        assert_eq!(rows["AAPL"].len(), 3);
        assert_eq!(rows["MSFT"].len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn remerging_unchanged_partitions_is_idempotent() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        store.write("AAPL", &bars(2, 3)).unwrap();
        store.write("MSFT", &bars(2, 2)).unwrap();

        let first = merge_partitions(&store, &table_path).unwrap();
        let rows_first = read_rows(&table_path);

        let second = merge_partitions(&store, &table_path).unwrap();
        let rows_second = read_rows(&table_path);

        assert_eq!(first.total_rows, 5);
        assert_eq!(second.total_rows, 5);
        assert_eq!(rows_first, rows_second);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn refetched_partition_replaces_prior_rows() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        store.write("AAPL", &bars(2, 5)).unwrap();
        merge_partitions(&store, &table_path).unwrap();

        // Corrected re-fetch: fewer rows, different values.
        store.write("AAPL", &bars(8, 2)).unwrap();
        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.total_rows, 2);
        let rows = read_rows(&table_path);
        assert_eq!(rows["AAPL"].len(), 2);
        assert_eq!(
            rows["AAPL"][0].date,
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn symbols_absent_from_the_store_survive_a_merge() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        store.write("AAPL", &bars(2, 3)).unwrap();
        merge_partitions(&store, &table_path).unwrap();

        // AAPL's partition disappears (e.g. fetch-only run elsewhere wrote
        // a different store) — its table rows must not vanish.
        store.remove("AAPL").unwrap();
        store.write("MSFT", &bars(2, 2)).unwrap();
        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.total_rows, 5);
        let rows = read_rows(&table_path);
        assert_eq!(rows["AAPL"].len(), 3);
        assert_eq!(rows["MSFT"].len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_partition_is_rejected_not_fatal() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        store.write("AAPL", &bars(2, 3)).unwrap();
        fs::write(store.partition_path("JUNK"), b"not parquet at all").unwrap();

        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.partitions_loaded, 1);
        assert_eq!(summary.partitions_rejected, 1);
        assert_eq!(summary.rejected_partitions[0].0, "JUNK");
        assert!(!summary.rejected_entirely());
        assert_eq!(summary.total_rows, 3);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn every_partition_rejected_is_flagged() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        fs::create_dir_all(store.data_dir()).unwrap();
        fs::write(store.partition_path("JUNK"), b"garbage").unwrap();

        let summary = merge_partitions(&store, &table_path).unwrap();
        assert!(summary.rejected_entirely());
        assert_eq!(summary.total_rows, 0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rows_with_null_keys_or_prices_are_rejected() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        // Hand-build a partition with a null date and a null close.
        let dates: Vec<Option<i32>> = vec![Some(19724), None, Some(19726)];
        let closes: Vec<Option<f64>> = vec![Some(101.0), Some(102.0), None];
        let plain: Vec<f64> = vec![100.0, 100.0, 100.0];
        let volumes: Vec<u64> = vec![1_000, 1_000, 1_000];
        let df = DataFrame::new(vec![
            Column::new("date".into(), dates)
                .cast(&DataType::Date)
                .unwrap(),
            Column::new("open".into(), plain.clone()),
            Column::new("high".into(), plain.clone()),
            Column::new("low".into(), plain.clone()),
            Column::new("close".into(), closes),
            Column::new("adj_close".into(), plain),
            Column::new("volume".into(), volumes),
        ])
        .unwrap();
        fs::create_dir_all(store.data_dir()).unwrap();
        store::write_parquet(&df, &store.partition_path("DIRTY")).unwrap();

        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.partitions_loaded, 1);
        assert_eq!(summary.rows_accepted, 1);
        assert_eq!(summary.rows_rejected, 2);
        assert_eq!(summary.total_rows, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_dates_collapse_to_the_last_row() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        let day = store::date_to_days(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        let dates: Vec<i32> = vec![day, day];
        let opens: Vec<f64> = vec![100.0, 200.0];
        let rest: Vec<f64> = vec![100.0, 200.0];
        let volumes: Vec<u64> = vec![1_000, 2_000];
        let df = DataFrame::new(vec![
            Column::new("date".into(), dates)
                .cast(&DataType::Date)
                .unwrap(),
            Column::new("open".into(), opens),
            Column::new("high".into(), rest.clone()),
            Column::new("low".into(), rest.clone()),
            Column::new("close".into(), rest.clone()),
            Column::new("adj_close".into(), rest),
            Column::new("volume".into(), volumes),
        ])
        .unwrap();
        fs::create_dir_all(store.data_dir()).unwrap();
        store::write_parquet(&df, &store.partition_path("DUP")).unwrap();

        let summary = merge_partitions(&store, &table_path).unwrap();
        assert_eq!(summary.total_rows, 1);

        let rows = read_rows(&table_path);
        assert_eq!(rows["DUP"][0].open, 200.0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_store_with_no_table_is_a_no_op() {
        let dir = temp_dir();
        let store = PartitionStore::new(dir.join("partitions"));
        let table_path = dir.join(TABLE_FILE);

        let summary = merge_partitions(&store, &table_path).unwrap();

        assert_eq!(summary.partitions_loaded, 0);
        assert_eq!(summary.total_rows, 0);
        assert!(!summary.rejected_entirely());
        assert!(!table_path.exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
