//! Primary Feed Adapter - Streaming Source Lifecycle
//!
//! Owns one `PrimarySource` and runs it in its own task:
//! connect, subscribe to the catalog's active symbols, pull
//! messages, normalize and ingest them. On any connection fault it
//! records a health failure, disconnects and reconnects with
//! full-jitter exponential backoff. Silence longer than the idle
//! timeout counts as an abnormal disconnect.
//!
//! Errors never leave this task; the router only sees their effect
//! on `HealthTracker`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::ingest::{IngestOutcome, TickIngest};
use super::normalize::{SymbolResolver, normalize_primary};
use crate::domain::backoff::Backoff;
use crate::ports::primary_source::{PrimarySource, RawMessage};
use crate::ports::symbol_catalog::SymbolCatalog;
use crate::ports::SourceError;

/// Timing knobs for the primary adapter.
#[derive(Debug, Clone)]
pub struct PrimaryAdapterSettings {
    /// Venue prefix for unqualified upstream symbols.
    pub venue: String,
    /// Longest silence tolerated on an open stream; also bounds connect.
    pub idle_timeout: Duration,
    /// How often the catalog is re-read.
    pub catalog_refresh: Duration,
}

/// How one streaming session ended.
enum SessionEnd {
    Shutdown,
    RouterClosed,
    Failed(SourceError),
}

/// Streaming adapter task for the primary source.
pub struct PrimaryAdapter<S: PrimarySource> {
    /// Exclusively owned upstream.
    source: S,
    /// Tracked symbols provider.
    catalog: Arc<dyn SymbolCatalog>,
    /// Shared normalize-validate-forward tail.
    ingest: TickIngest,
    /// Reconnect policy.
    backoff: Backoff,
    settings: PrimaryAdapterSettings,
    /// Symbols currently subscribed upstream.
    symbols: Vec<String>,
    /// Maps upstream tickers back to `symbols`.
    resolver: SymbolResolver,
}

impl<S: PrimarySource> PrimaryAdapter<S> {
    pub fn new(
        source: S,
        catalog: Arc<dyn SymbolCatalog>,
        ingest: TickIngest,
        backoff: Backoff,
        settings: PrimaryAdapterSettings,
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
        }
    }

    /// Run until shutdown or until the router stops listening.
    #[instrument(skip_all, name = "primary_adapter")]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        self.refresh_symbols().await;
        info!(symbols = self.symbols.len(), "Primary adapter started");

        loop {
            let error = match self.connect().await {
                Ok(()) => match self.stream(&mut shutdown_rx).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::RouterClosed => {
                        info!("Router closed, primary adapter stopping");
                        break;
                    }
                    SessionEnd::Failed(e) => e,
                },
                Err(e) => e,
            };

            self.ingest.record_failure(&error);
            self.source.disconnect().await;

            let delay = self.backoff.next_delay();
            self.ingest
                .record_retry(self.backoff.attempts(), delay.as_millis(), &error);

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.source.disconnect().await;
        info!("Primary adapter stopped");
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let timeout = self.settings.idle_timeout;

        tokio::time::timeout(timeout, self.source.connect())
            .await
            .map_err(|_| SourceError::Timeout(timeout))??;

        if !self.symbols.is_empty() {
            tokio::time::timeout(timeout, self.source.subscribe(&self.symbols))
                .await
                .map_err(|_| SourceError::Timeout(timeout))??;
        }

        self.backoff.reset();
        self.ingest.record_success();
        info!(symbols = self.symbols.len(), "Primary source connected");
        Ok(())
    }

    async fn stream(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> SessionEnd {
        let idle = self.settings.idle_timeout;
        let refresh_every = self.settings.catalog_refresh;
        let mut refresh = tokio::time::interval_at(Instant::now() + refresh_every, refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return SessionEnd::Shutdown,
                _ = refresh.tick() => {
                    if self.refresh_symbols().await {
                        if let Err(e) = self.source.subscribe(&self.symbols).await {
                            return SessionEnd::Failed(e);
                        }
                        info!(symbols = self.symbols.len(), "Primary subscription updated");
                    }
                }
                next = tokio::time::timeout(idle, self.source.next_message()) => {
                    match next {
                        Err(_) => return SessionEnd::Failed(SourceError::Timeout(idle)),
                        Ok(Ok(Some(message))) => {
                            if self.handle(&message) == Some(IngestOutcome::RouterClosed) {
                                return SessionEnd::RouterClosed;
                            }
                        }
                        Ok(Ok(None)) => {
                            return SessionEnd::Failed(SourceError::Transport(
                                "stream closed by upstream".to_string(),
                            ));
                        }
                        Ok(Err(e)) if !e.is_health_relevant() => self.ingest.record_malformed(&e),
                        Ok(Err(e)) => return SessionEnd::Failed(e),
                    }
                }
            }
        }
    }

    fn handle(&mut self, message: &RawMessage) -> Option<IngestOutcome> {
        let now = Utc::now();
        match normalize_primary(message, &self.resolver) {
            Ok(Some(pending)) => Some(self.ingest.accept(pending, now)),
            Ok(None) => {
                self.ingest.heartbeat(now);
                None
            }
            Err(e) => {
                self.ingest.record_malformed(&e);
                None
            }
        }
    }

    /// Re-read the catalog. Returns `true` when the symbol set changed.
    ///
    /// A catalog error keeps the previous set.
    async fn refresh_symbols(&mut self) -> bool {
        match self.catalog.active_symbols().await {
            Ok(symbols) if symbols != self.symbols => {
                debug!(before = self.symbols.len(), after = symbols.len(), "Tracked symbols changed");
                self.resolver.track(&symbols);
                self.symbols = symbols;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Symbol catalog refresh failed, keeping previous symbols");
                false
            }
        }
    }
}
