//! Feed Task Supervisor - Adapter Wiring and Lifecycle
//!
//! Builds both source adapters around their bounded router queues
//! and spawns each as its own tokio task. Each adapter runs its own
//! reconnect loop; the supervisor only coordinates shutdown through
//! the shared broadcast signal.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::fallback::{FallbackAdapter, FallbackAdapterSettings};
use super::ingest::TickIngest;
use super::primary::{PrimaryAdapter, PrimaryAdapterSettings};
use crate::adapters::metrics::RouterMetrics;
use crate::config::AppConfig;
use crate::domain::backoff::Backoff;
use crate::domain::health::HealthTracker;
use crate::domain::tick::{NormalizedTick, SourceId};
use crate::domain::validator::TickValidator;
use crate::ports::fallback_source::FallbackSource;
use crate::ports::primary_source::PrimarySource;
use crate::ports::symbol_catalog::SymbolCatalog;
use crate::usecases::router::RouterInputs;

/// Spawns and supervises both feed adapters.
pub struct FeedSupervisor {
    /// Shared health, written by both adapters.
    health: Arc<HealthTracker>,
    /// Metrics sink.
    metrics: Arc<RouterMetrics>,
    /// Validator shared by value with each adapter.
    validator: TickValidator,
    /// Template reconnect policy, cloned per adapter.
    backoff: Backoff,
    /// Capacity of each adapter-to-router queue.
    queue_capacity: usize,
    primary: PrimaryAdapterSettings,
    fallback: FallbackAdapterSettings,
    /// Shutdown broadcaster.
    shutdown_tx: broadcast::Sender<()>,
}

impl FeedSupervisor {
    pub fn new(
        config: &AppConfig,
        health: Arc<HealthTracker>,
        metrics: Arc<RouterMetrics>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let catalog_refresh = config.catalog.refresh_interval();

        Self {
            health,
            metrics,
            validator: TickValidator::new(config.validation.validator_config()),
            backoff: Backoff::new(config.reconnect.base_delay(), config.reconnect.max_delay()),
            queue_capacity: config.router.queue_capacity,
            primary: PrimaryAdapterSettings {
                venue: config.primary.venue.clone(),
                idle_timeout: config.primary_idle_timeout(),
                catalog_refresh,
            },
            fallback: FallbackAdapterSettings {
                venue: config.fallback.venue.clone(),
                poll_interval: config.fallback.poll_interval(),
                request_timeout: config.fallback.request_timeout(),
                catalog_refresh,
            },
            shutdown_tx,
        }
    }

    /// Spawn both adapters. Returns the router ends of their queues.
    ///
    /// Each queue closes when its adapter task ends, which lets the
    /// router's routing loop finish once both are done.
    #[instrument(skip_all)]
    pub fn spawn<P, F>(
        &self,
        primary: P,
        fallback: F,
        catalog: Arc<dyn SymbolCatalog>,
    ) -> (RouterInputs, Vec<JoinHandle<()>>)
    where
        P: PrimarySource,
        F: FallbackSource,
    {
        let (primary_tx, primary_rx) = mpsc::channel(self.queue_capacity);
        let (fallback_tx, fallback_rx) = mpsc::channel(self.queue_capacity);

        let primary_adapter = PrimaryAdapter::new(
            primary,
            Arc::clone(&catalog),
            self.ingest(SourceId::Primary, primary_tx),
            self.backoff.clone(),
            self.primary.clone(),
        );
        let fallback_adapter = FallbackAdapter::new(
            fallback,
            catalog,
            self.ingest(SourceId::Fallback, fallback_tx),
            self.backoff.clone(),
            self.fallback.clone(),
        );

        let handles = vec![
            tokio::spawn(primary_adapter.run(self.shutdown_tx.subscribe())),
            tokio::spawn(fallback_adapter.run(self.shutdown_tx.subscribe())),
        ];

        info!(
            feed_count = handles.len(),
            queue_capacity = self.queue_capacity,
            "Feed tasks spawned"
        );

        (
            RouterInputs {
                primary: primary_rx,
                fallback: fallback_rx,
            },
            handles,
        )
    }

    fn ingest(
        &self,
        source: SourceId,
        output: mpsc::Sender<NormalizedTick>,
    ) -> TickIngest {
        TickIngest::new(
            source,
            self.validator,
            Arc::clone(&self.health),
            Arc::clone(&self.metrics),
            output,
        )
    }
}
