//! HTTP Poll Source - Rate-limited REST Snapshot Fallback
//!
//! `FallbackSource` over a REST quote endpoint:
//! `GET {base_url}/v1/quotes?symbols=AAPL,MSFT` answering
//! `{"quotes":[{"symbol":"AAPL","price":187.25,"volume":1200,"timestamp_ms":...}]}`.
//! Requests are paced by a governor quota so polling (including
//! backoff retries) never exceeds the upstream budget.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::FallbackConfig;
use crate::domain::tick::bare_ticker;
use crate::ports::SourceError;
use crate::ports::fallback_source::{FallbackSource, RawTick};

/// Response body of the quotes endpoint.
#[derive(Debug, Deserialize)]
struct QuotesResponse {
    #[serde(default)]
    quotes: Vec<RawTick>,
}

/// REST polling source.
pub struct HttpPollSource {
    /// Underlying HTTP client.
    http: Client,
    /// Base URL, without trailing slash.
    base_url: String,
    /// Request pacing.
    limiter: DefaultDirectRateLimiter,
    /// Per-request bound, reported in timeout errors.
    request_timeout: Duration,
}

impl HttpPollSource {
    /// Build the client from the `[fallback]` section.
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build HTTP client")?;

        let per_minute = NonZeroU32::new(config.max_requests_per_minute)
            .context("fallback.max_requests_per_minute must be positive")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            request_timeout: config.request_timeout(),
        })
    }

    fn quotes_request(&self, symbols: &[String]) -> RequestBuilder {
        let tickers: Vec<&str> = symbols.iter().map(|s| bare_ticker(s)).collect();
        self.http
            .get(format!("{}/v1/quotes", self.base_url))
            .query(&[("symbols", tickers.join(","))])
    }
}

#[async_trait]
impl FallbackSource for HttpPollSource {
    async fn poll(&self, symbols: &[String]) -> Result<Vec<RawTick>, SourceError> {
        self.limiter.until_ready().await;

        let response = self.quotes_request(symbols).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.request_timeout)
            } else if e.is_connect() {
                SourceError::Connect(e.to_string())
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limited by quote API");
                return Err(SourceError::Transport("rate limited".to_string()));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Transport(format!("HTTP {status}: {body}")));
            }
        }

        let body: QuotesResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        debug!(requested = symbols.len(), returned = body.quotes.len(), "Quotes polled");
        Ok(body.quotes)
    }
}
