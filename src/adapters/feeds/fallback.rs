//! Fallback Feed Adapter - Polling Source Loop
//!
//! Polls one `FallbackSource` on a fixed interval while it answers,
//! and on the backoff schedule while it does not. Every poll is
//! bounded by the request timeout. Answers are normalized with the
//! receipt time and run through the shared ingest tail.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::ingest::{IngestOutcome, TickIngest};
use super::normalize::{SymbolResolver, normalize_fallback};
use crate::domain::backoff::Backoff;
use crate::ports::fallback_source::FallbackSource;
use crate::ports::symbol_catalog::SymbolCatalog;
use crate::ports::SourceError;

/// Timing knobs for the fallback adapter.
#[derive(Debug, Clone)]
pub struct FallbackAdapterSettings {
    /// Venue prefix for unqualified upstream symbols.
    pub venue: String,
    /// Gap between successful polls.
    pub poll_interval: Duration,
    /// Bound on a single poll.
    pub request_timeout: Duration,
    /// How often the catalog is re-read.
    pub catalog_refresh: Duration,
}

/// Polling adapter task for the fallback source.
pub struct FallbackAdapter<S: FallbackSource> {
    source: S,
    catalog: Arc<dyn SymbolCatalog>,
    ingest: TickIngest,
    backoff: Backoff,
    settings: FallbackAdapterSettings,
    symbols: Vec<String>,
    resolver: SymbolResolver,
    refreshed_at: Option<Instant>,
}

impl<S: FallbackSource> FallbackAdapter<S> {
    pub fn new(
        source: S,
        catalog: Arc<dyn SymbolCatalog>,
        ingest: TickIngest,
        backoff: Backoff,
        settings: FallbackAdapterSettings,
    ) -> Self {
        let resolver = SymbolResolver::new(settings.venue.clone());
        Self {
            source,
            catalog,
            ingest,
            backoff,
            settings,
            symbols: Vec::new(),
            resolver,
            refreshed_at: None,
        }
    }

    /// Run until shutdown or until the router stops listening. The first poll is immediate.
    #[instrument(skip_all, name = "fallback_adapter")]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            "Fallback adapter started"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }

            if !self.ingest.is_open() {
                info!("Router closed, fallback adapter stopping");
                break;
            }

            delay = match self.poll_once().await {
                Ok(_) => self.settings.poll_interval,
                Err(e) => {
                    self.ingest.record_failure(&e);
                    let delay = self.backoff.next_delay();
                    self.ingest
                        .record_retry(self.backoff.attempts(), delay.as_millis(), &e);
                    delay
                }
            };
        }

        info!("Fallback adapter stopped");
    }

    /// One bounded poll. Returns how many ticks reached the router.
    pub async fn poll_once(&mut self) -> Result<usize, SourceError> {
        self.maybe_refresh_symbols().await;
        if self.symbols.is_empty() {
            return Ok(0);
        }

        let timeout = self.settings.request_timeout;
        let raw = match tokio::time::timeout(timeout, self.source.poll(&self.symbols)).await {
            Err(_) => return Err(SourceError::Timeout(timeout)),
            Ok(Err(e)) if !e.is_health_relevant() => {
                self.ingest.record_malformed(&e);
                return Ok(0);
            }
            Ok(result) => result?,
        };

        self.backoff.reset();
        self.ingest.record_success();

        let received_at = Utc::now();
        let mut forwarded = 0;
        for tick in &raw {
            match normalize_fallback(tick, &self.resolver, received_at) {
                Ok(pending) => {
                    if self.ingest.accept(pending, received_at) == IngestOutcome::Forwarded {
                        forwarded += 1;
                    }
                }
                Err(e) => self.ingest.record_malformed(&e),
            }
        }

        Ok(forwarded)
    }

    async fn maybe_refresh_symbols(&mut self) {
        let due = self
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= self.settings.catalog_refresh);
        if !due {
            return;
        }

        match self.catalog.active_symbols().await {
            Ok(symbols) => {
                self.resolver.track(&symbols);
                self.symbols = symbols;
                self.refreshed_at = Some(Instant::now());
            }
            Err(e) => warn!(error = %e, "Symbol catalog refresh failed, keeping previous symbols"),
        }
    }
}
