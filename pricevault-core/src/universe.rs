//! Ticker universe resolution — static symbol lists.
//!
//! Sources are CSV files carrying a `Symbol` column or plain-text files
//! with one symbol per line. Entries are normalized (trimmed, uppercased,
//! `^` and `.` mapped to `-` as in `BRK.B` → `BRK-B`), invalid entries
//! dropped, and duplicates removed with first-seen order preserved.

use crate::config::ConfigError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The resolved, de-duplicated, order-stable set of symbols to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    symbols: Vec<String>,
}

impl Universe {
    /// Resolve a universe from raw entries (CLI `--symbols`, tests).
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut symbols = Vec::new();
        let mut dropped = 0usize;

        for entry in entries {
            match normalize_symbol(entry.as_ref()) {
                Some(sym) => {
                    if seen.insert(sym.clone()) {
                        symbols.push(sym);
                    }
                }
                None => {
                    if !entry.as_ref().trim().is_empty() {
                        dropped += 1;
                    }
                }
            }
        }

        if dropped > 0 {
            debug!(dropped, "dropped invalid universe entries");
        }
        if symbols.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        Ok(Self { symbols })
    }

    /// Resolve a universe from one or more source files.
    ///
    /// `.csv` files must carry a `Symbol` column (any capitalization);
    /// anything else is read as one symbol per line. A missing or
    /// unreadable file is an error, never silently skipped.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        if paths.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }

        let mut entries = Vec::new();
        for path in paths {
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                entries.extend(read_csv_symbols(path)?);
            } else {
                entries.extend(read_text_symbols(path)?);
            }
        }
        Self::from_entries(entries)
    }

    /// Symbols in resolution order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Normalize one raw universe entry.
///
/// Returns `None` for entries that are empty or carry characters outside
/// `A-Z0-9-` after mapping.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_ascii_uppercase().replace(['^', '.'], "-");
    if cleaned.is_empty() {
        return None;
    }
    let valid = cleaned
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-');
    valid.then_some(cleaned)
}

fn read_csv_symbols(path: &Path) -> Result<Vec<String>, ConfigError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ConfigError::UniverseSource(format!("{}: {e}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|e| ConfigError::UniverseSource(format!("{}: {e}", path.display())))?
        .clone();
    let idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("symbol"))
        .ok_or_else(|| {
            ConfigError::UniverseSource(format!("{}: no Symbol column", path.display()))
        })?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| ConfigError::UniverseSource(format!("{}: {e}", path.display())))?;
        if let Some(field) = record.get(idx) {
            out.push(field.to_string());
        }
    }
    Ok(out)
}

fn read_text_symbols(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::UniverseSource(format!("{}: {e}", path.display())))?;
    Ok(content.lines().map(str::to_string).collect())
}
