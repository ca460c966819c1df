//! Pipeline configuration and credential loading.
//!
//! Everything a run needs is collected into an explicit `PipelineConfig`
//! passed down from the CLI — there is no global state. The provider token
//! is resolved from the environment first, then a token file.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted first for the Tiingo API token.
pub const TOKEN_ENV_VAR: &str = "TIINGO_API_TOKEN";

/// Configuration-level errors. These abort a run before any network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("universe source error: {0}")]
    UniverseSource(String),

    #[error("universe is empty — no valid symbols in any source")]
    EmptyUniverse,

    #[error("API token not found — set TIINGO_API_TOKEN or create {0}")]
    MissingToken(String),

    #[error("config file error: {0}")]
    ConfigFile(String),
}

/// Opaque provider API token.
///
/// Debug output is redacted so the token cannot leak through logs or
/// error chains.
#[derive(Clone)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(redacted)")
    }
}

/// Resolve the API token: environment variable first, then `token_file`.
pub fn resolve_token(token_file: &Path) -> Result<ApiToken, ConfigError> {
    token_from_sources(std::env::var(TOKEN_ENV_VAR).ok().as_deref(), token_file)
}

fn token_from_sources(env_value: Option<&str>, token_file: &Path) -> Result<ApiToken, ConfigError> {
    if let Some(raw) = env_value {
        if !raw.trim().is_empty() {
            return Ok(ApiToken::new(raw));
        }
    }
    match std::fs::read_to_string(token_file) {
        Ok(raw) if !raw.trim().is_empty() => Ok(ApiToken::new(raw)),
        _ => Err(ConfigError::MissingToken(
            token_file.display().to_string(),
        )),
    }
}

/// Pipeline settings, loadable from TOML. Every field has a default so a
/// config file only needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one Parquet partition per symbol.
    pub data_dir: PathBuf,
    /// Path of the consolidated price table.
    pub table_path: PathBuf,
    /// Universe source files (CSV with a `Symbol` column, or plain text).
    pub universe_files: Vec<PathBuf>,
    /// Earliest trading date requested from the provider.
    pub start_date: NaiveDate,
    /// Global cap on simultaneously in-flight fetches.
    pub max_concurrency: usize,
    /// Token file consulted when the environment variable is absent.
    pub token_file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/daily_stock_price"),
            table_path: PathBuf::from("data/fact_price_daily.parquet"),
            universe_files: Vec::new(),
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            max_concurrency: 10,
            token_file: PathBuf::from("tiingo_token"),
        }
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ConfigFile(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigFile(e.to_string()))
    }
}
