//! Read-only query facade over the consolidated table.
//!
//! Analysis code reads the consolidated table and nothing else — raw
//! partitions stay an implementation detail of the pipeline.

use polars::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("consolidated table not found at {0} — run the load step first")]
    NoTable(String),

    #[error("query failed: {0}")]
    Table(String),
}

/// The most recent `days` rows for one symbol, date-ascending for display.
///
/// An unknown symbol yields an empty frame, not an error.
pub fn recent_history(
    table_path: &Path,
    symbol: &str,
    days: usize,
) -> Result<DataFrame, QueryError> {
    if !table_path.exists() {
        return Err(QueryError::NoTable(table_path.display().to_string()));
    }

    let lf = LazyFrame::scan_parquet(table_path, Default::default())
        .map_err(|e| QueryError::Table(format!("scan table: {e}")))?;

    let df = lf
        .filter(col("ticker").eq(lit(symbol)))
        .sort(
            ["dt"],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .limit(days as IdxSize)
        .collect()
        .map_err(|e| QueryError::Table(format!("collect: {e}")))?;

    // Window selected newest-first; re-order ascending for display.
    df.sort(["dt"], SortMultipleOptions::default())
        .map_err(|e| QueryError::Table(format!("sort: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge_partitions, TABLE_FILE};
    use crate::provider::PriceBar;
    use crate::store::PartitionStore;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("pricevault_query_{}_{id}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn bars(n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| PriceBar {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
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

    fn build_table(dir: &Path) -> PathBuf {
        let store = PartitionStore::new(dir.join("partitions"));
        store.write("AAPL", &bars(5)).unwrap();
        store.write("MSFT", &bars(2)).unwrap();
        let table_path = dir.join(TABLE_FILE);
        merge_partitions(&store, &table_path).unwrap();
        table_path
    }

    #[test]
    fn returns_the_most_recent_rows_ascending() {
        let dir = temp_dir();
        let table_path = build_table(&dir);

        let df = recent_history(&table_path, "AAPL", 3).unwrap();
        assert_eq!(df.height(), 3);

        let dt_ca = df.column("dt").unwrap().date().unwrap();
        let days: Vec<i32> = (0..3).map(|i| dt_ca.get(i).unwrap()).collect();
        assert!(days.windows(2).all(|w| w[0] < w[1]));

        // most recent AAPL close is the 5th bar
        let close_ca = df.column("close").unwrap().f64().unwrap();
        assert_eq!(close_ca.get(2), Some(104.5));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn window_larger_than_history_returns_everything() {
        let dir = temp_dir();
        let table_path = build_table(&dir);

        let df = recent_history(&table_path, "MSFT", 100).unwrap();
        assert_eq!(df.height(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_symbol_yields_an_empty_frame() {
        let dir = temp_dir();
        let table_path = build_table(&dir);

        let df = recent_history(&table_path, "NONE", 10).unwrap();
        assert_eq!(df.height(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_table_is_a_distinct_error() {
        let err = recent_history(Path::new("/no/such/table.parquet"), "AAPL", 10).unwrap_err();
        assert!(matches!(err, QueryError::NoTable(_)));
    }
}
