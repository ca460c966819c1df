//! Per-symbol Parquet partition store.
//!
//! Layout: `{data_dir}/{SYMBOL}.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Existence probe for skip logic (file metadata only, no parse)
//! - Integrity validation on load (schema check, row count > 0)
//!
//! Partitions are written once per symbol and never mutated; refresh mode
//! deletes and recreates. Each concurrent fetch task owns exactly one
//! symbol's file, so the store needs no locking.

use crate::provider::PriceBar;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column set every partition must carry, in schema order.
pub(crate) const PARTITION_COLUMNS: [&str; 7] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "adj_close",
    "volume",
];

/// Errors from partition persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("partition I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("partition validation error: {0}")]
    Validation(String),

    #[error("no partition for symbol '{symbol}'")]
    NoPartition { symbol: String },
}

/// The partition store: a directory of per-symbol Parquet files.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    data_dir: PathBuf,
}

impl PartitionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the partition for a symbol: `{data_dir}/{SYMBOL}.parquet`.
    /// Derivable from the symbol alone, so the skip probe never opens a file.
    pub fn partition_path(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{symbol}.parquet"))
    }

    /// Whether a non-empty partition exists for `symbol`.
    ///
    /// This is the "already fetched" signal: a pure filesystem probe.
    pub fn has(&self, symbol: &str) -> bool {
        fs::metadata(self.partition_path(symbol))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Write a symbol's full history to its partition.
    ///
    /// Rows are sorted date-ascending before writing. The write is atomic:
    /// the data lands in a `.tmp` file that is renamed into place, so an
    /// interrupted run never leaves a truncated partition behind.
    pub fn write(&self, symbol: &str, bars: &[PriceBar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Err(StoreError::Validation(
                "refusing to write an empty partition".into(),
            ));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StoreError::Io(format!("failed to create data dir: {e}")))?;

        let mut sorted: Vec<&PriceBar> = bars.iter().collect();
        sorted.sort_by_key(|b| b.date);

        let df = bars_to_dataframe(&sorted)?;
        let path = self.partition_path(symbol);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&df, &tmp_path)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            // Clean up temp file on rename failure
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        Ok(())
    }

    /// Load a symbol's partition, sorted by date ascending.
    pub fn load(&self, symbol: &str) -> Result<Vec<PriceBar>, StoreError> {
        let path = self.partition_path(symbol);
        if !path.exists() {
            return Err(StoreError::NoPartition {
                symbol: symbol.to_string(),
            });
        }
        let df = read_partition_df(&path)?;
        let mut bars = dataframe_to_bars(&df)?;
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Delete the partition for `symbol` (refresh mode).
    /// A missing partition is not an error.
    pub fn remove(&self, symbol: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.partition_path(symbol)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("remove partition: {e}"))),
        }
    }

    /// Symbols with a partition on disk, with their paths, sorted by symbol.
    ///
    /// The symbol is the file stem uppercased, the inverse of
    /// `partition_path` for the normalized universe charset.
    pub fn partitions(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.data_dir)
            .map_err(|e| StoreError::Io(format!("read data dir: {e}")))?;

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push((stem.to_ascii_uppercase(), path));
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Per-partition status for display: symbol, row count, date range.
    pub fn status(&self) -> Result<Vec<PartitionStatus>, StoreError> {
        let mut out = Vec::new();
        for (symbol, _path) in self.partitions()? {
            match self.load(&symbol) {
                Ok(bars) => out.push(PartitionStatus {
                    symbol,
                    rows: bars.len(),
                    start_date: bars.first().map(|b| b.date),
                    end_date: bars.last().map(|b| b.date),
                    readable: true,
                }),
                Err(_) => out.push(PartitionStatus {
                    symbol,
                    rows: 0,
                    start_date: None,
                    end_date: None,
                    readable: false,
                }),
            }
        }
        Ok(out)
    }
}

/// Status of a single partition.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub symbol: String,
    pub rows: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub readable: bool,
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

pub(crate) fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

/// Days since the Unix epoch, the physical representation of a Date column.
pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// Convert price bars to a partition DataFrame.
fn bars_to_dataframe(bars: &[&PriceBar]) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = bars.iter().map(|b| date_to_days(b.date)).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let adj_closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
pub(crate) fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file =
        fs::File::create(path).map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Open a partition file and validate its shape (rows present, expected
/// columns). Row-level content checks are the merge stage's job.
pub(crate) fn read_partition_df(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(StoreError::Validation("empty partition file".into()));
    }
    for col_name in &PARTITION_COLUMNS {
        if df.column(col_name).is_err() {
            return Err(StoreError::Validation(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    Ok(df)
}

/// Convert a partition DataFrame back to price bars.
///
/// A null date is a corrupt partition; null prices are carried through as
/// NaN here — rejecting rows is merge-stage policy, not a load concern.
fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<PriceBar>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));

    let date_ca = df
        .column("date")
        .map_err(map_err)?
        .date()
        .map_err(|e| StoreError::Parquet(format!("date column type: {e}")))?;
    let open_ca = df
        .column("open")
        .map_err(map_err)?
        .f64()
        .map_err(|e| StoreError::Parquet(format!("open column type: {e}")))?;
    let high_ca = df
        .column("high")
        .map_err(map_err)?
        .f64()
        .map_err(|e| StoreError::Parquet(format!("high column type: {e}")))?;
    let low_ca = df
        .column("low")
        .map_err(map_err)?
        .f64()
        .map_err(|e| StoreError::Parquet(format!("low column type: {e}")))?;
    let close_ca = df
        .column("close")
        .map_err(map_err)?
        .f64()
        .map_err(|e| StoreError::Parquet(format!("close column type: {e}")))?;
    let adj_ca = df
        .column("adj_close")
        .map_err(map_err)?
        .f64()
        .map_err(|e| StoreError::Parquet(format!("adj_close column type: {e}")))?;
    let vol_ca = df
        .column("volume")
        .map_err(map_err)?
        .u64()
        .map_err(|e| StoreError::Parquet(format!("volume column type: {e}")))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    let epoch = epoch();

    for i in 0..n {
        let date_days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Validation(format!("null date at row {i}")))?;
        bars.push(PriceBar {
            date: epoch + chrono::Duration::days(date_days as i64),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            adj_close: adj_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(bars)
}
