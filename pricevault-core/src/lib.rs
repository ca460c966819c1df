//! PriceVault core — incremental daily price fetch-and-load pipeline.
//!
//! This crate contains the whole data layer:
//! - Universe resolution from static symbol lists
//! - Concurrency-bounded fetching from the Tiingo daily API
//! - Per-symbol Parquet partitions with atomic writes
//! - Replace-by-symbol merge into the consolidated price table
//! - Read-only query facade over the consolidated table

pub mod config;
pub mod fetch;
pub mod merge;
pub mod provider;
pub mod query;
pub mod store;
pub mod tiingo;
pub mod universe;

pub use config::{resolve_token, ApiToken, ConfigError, PipelineConfig};
pub use fetch::{
    fetch_universe, FetchConfig, FetchProgress, FetchSummary, SilentProgress, StdoutProgress,
    SymbolError,
};
pub use merge::{merge_partitions, MergeError, MergeSummary, TABLE_FILE};
pub use provider::{FetchError, PriceBar, PriceProvider};
pub use query::{recent_history, QueryError};
pub use store::{PartitionStatus, PartitionStore, StoreError};
pub use tiingo::TiingoProvider;
pub use universe::Universe;
