//! Price provider trait and structured fetch errors.
//!
//! The PriceProvider trait abstracts over the remote market-data source so
//! the fetch orchestrator can be driven by a scripted double in tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One daily OHLCV row.
///
/// The owning symbol lives next to the rows (partition file name, ticker
/// column in the consolidated table), not inside them — matching the
/// provider payload and the partition schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

/// Structured error types for fetch operations.
///
/// Transient variants are retried by the provider; permanent ones fail the
/// symbol immediately. Either way the orchestrator records the failure and
/// moves on — a fetch error never aborts the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned HTTP {status}")]
    Http { status: u16 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("malformed provider response: {0}")]
    BadResponse(String),

    #[error("retries exhausted after {attempts} attempts: {cause}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        cause: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether this failure class is worth retrying.
    ///
    /// An exhausted retry loop reports the class of its last cause so the
    /// final tally can still distinguish flaky symbols from bad ones.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::RateLimited { .. } => true,
            FetchError::Http { status } => *status >= 500,
            FetchError::RetriesExhausted { cause, .. } => cause.is_transient(),
            _ => false,
        }
    }
}

/// Trait for daily-history providers.
///
/// Implementations own transport, retry, and response parsing. Persistence
/// is the orchestrator's job — a provider only talks to the network.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch the complete daily history for one symbol from `start` onward,
    /// ordered by date ascending.
    ///
    /// An empty history is a valid result (delisted symbol, no data in
    /// range), not an error.
    async fn fetch(&self, symbol: &str, start: NaiveDate) -> Result<Vec<PriceBar>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Network("connection reset".into()).is_transient());
        assert!(FetchError::RateLimited {
            retry_after_secs: 60
        }
        .is_transient());
        assert!(FetchError::Http { status: 503 }.is_transient());

        assert!(!FetchError::Http { status: 418 }.is_transient());
        assert!(!FetchError::SymbolNotFound {
            symbol: "BADSYM".into()
        }
        .is_transient());
        assert!(!FetchError::AuthRejected("HTTP 403".into()).is_transient());
        assert!(!FetchError::BadResponse("truncated body".into()).is_transient());
    }

    #[test]
    fn exhausted_retries_inherit_cause_class() {
        let transient = FetchError::RetriesExhausted {
            attempts: 4,
            cause: Box::new(FetchError::Http { status: 502 }),
        };
        assert!(transient.is_transient());

        let permanent = FetchError::RetriesExhausted {
            attempts: 4,
            cause: Box::new(FetchError::BadResponse("garbage".into())),
        };
        assert!(!permanent.is_transient());
    }
}
