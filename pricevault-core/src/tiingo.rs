//! Tiingo daily-prices provider.
//!
//! Fetches the full daily history for one symbol from Tiingo's
//! `/tiingo/daily/{ticker}/prices` endpoint. Transient upstream failures
//! (connect/timeout, 429, 5xx) are retried with exponential backoff;
//! auth rejections and unknown symbols fail immediately.

use crate::config::ApiToken;
use crate::provider::{FetchError, PriceBar, PriceProvider};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const TIINGO_BASE_URL: &str = "https://api.tiingo.com";

/// One row of the Tiingo daily-prices payload.
#[derive(Debug, Deserialize)]
struct DailyRow {
    date: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(rename = "adjClose")]
    adj_close: f64,
    volume: u64,
}

/// Tiingo data provider.
pub struct TiingoProvider {
    client: reqwest::Client,
    token: ApiToken,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl TiingoProvider {
    pub fn new(token: ApiToken) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            token,
            base_url: TIINGO_BASE_URL.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Override the retry policy (attempt ceiling and initial backoff).
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Point the provider at a different host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Daily-prices URL for a symbol.
    fn prices_url(&self, symbol: &str) -> String {
        format!("{}/tiingo/daily/{symbol}/prices", self.base_url)
    }

    /// Convert payload rows into date-ascending price bars.
    fn rows_to_bars(mut rows: Vec<DailyRow>) -> Vec<PriceBar> {
        rows.sort_by_key(|r| r.date);
        rows.into_iter()
            .map(|r| PriceBar {
                date: r.date.date_naive(),
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                adj_close: r.adj_close,
                volume: r.volume,
            })
            .collect()
    }

    /// Execute the request with retry and exponential backoff.
    async fn fetch_with_retry(
        &self,
        symbol: &str,
        start: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let url = self.prices_url(symbol);
        let start_param = start.format("%Y-%m-%d").to_string();
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = match &last_error {
                    // 429 carries its own suggested delay
                    Some(FetchError::RateLimited { retry_after_secs }) => {
                        Duration::from_secs(*retry_after_secs).max(self.base_delay)
                    }
                    _ => self.base_delay * 2u32.pow(attempt - 1),
                };
                debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                tokio::time::sleep(delay).await;
            }

            let request = self.client.get(&url).query(&[
                ("startDate", start_param.as_str()),
                ("token", self.token.expose()),
            ]);

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(FetchError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }
                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(FetchError::AuthRejected(format!(
                            "HTTP {status} for {symbol}"
                        )));
                    }
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(symbol, retry_after, "rate limited by provider");
                        last_error = Some(FetchError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }
                    if status.is_server_error() {
                        last_error = Some(FetchError::Http {
                            status: status.as_u16(),
                        });
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchError::Http {
                            status: status.as_u16(),
                        });
                    }

                    let rows: Vec<DailyRow> = resp.json().await.map_err(|e| {
                        FetchError::BadResponse(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;
                    return Ok(Self::rows_to_bars(rows));
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(FetchError::Network(e.to_string()));
                        continue;
                    }
                    return Err(FetchError::Network(e.to_string()));
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts: self.max_retries + 1,
            cause: Box::new(
                last_error.unwrap_or_else(|| FetchError::Network("max retries exceeded".into())),
            ),
        })
    }
}

#[async_trait]
impl PriceProvider for TiingoProvider {
    fn name(&self) -> &str {
        "tiingo"
    }

    async fn fetch(&self, symbol: &str, start: NaiveDate) -> Result<Vec<PriceBar>, FetchError> {
        self.fetch_with_retry(symbol, start).await
    }
}
