//! Prometheus Metrics Registry - Routing Observability
//!
//! Registers and exposes Prometheus metrics on :9090 for Grafana
//! dashboards. Covers tick intake, validation rejects, routing
//! decisions, source health, failover transitions and fan-out.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Centralized Prometheus metrics for the router.
///
/// All metrics follow the naming convention `feed_router_*` and
/// carry `source` labels where a source is involved.
pub struct RouterMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Raw messages normalized into ticks, per source.
    pub ticks_received: IntCounterVec,
    /// Ticks rejected by the validator, per source and reason.
    pub ticks_rejected: IntCounterVec,
    /// Ticks forwarded by the router, per source and routing reason.
    pub ticks_routed: IntCounterVec,
    /// Ticks dropped without error, per source and cause.
    pub ticks_dropped: IntCounterVec,
    /// Raw messages that could not be normalized, per source.
    pub normalize_errors: IntCounterVec,
    /// Current router state (0 primary, 1 fallback, 2 grace, 3 both-unavailable).
    pub router_state: IntGauge,
    /// State transitions, per edge.
    pub state_transitions: IntCounterVec,
    /// Source health (2 connected, 1 degraded, 0 disconnected).
    pub source_health: IntGaugeVec,
    /// Reconnect or re-poll attempts after a failure, per source.
    pub reconnect_attempts: IntCounterVec,
    /// Ticks delivered to subscriber queues.
    pub fanout_published: IntCounter,
    /// Ticks superseded inside a throttle window.
    pub fanout_throttled: IntCounter,
    /// Subscribers removed for backpressure or closure.
    pub fanout_subscribers_dropped: IntCounterVec,
    /// Live subscribers.
    pub fanout_subscribers: IntGauge,
    /// Cached ticks not replayed to a new subscriber because its queue was full.
    pub fanout_replay_skipped: IntCounter,
}

impl RouterMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_received = IntCounterVec::new(
            Opts::new("feed_router_ticks_received_total", "Ticks normalized from upstream messages"),
            &["source"],
        )?;

        let ticks_rejected = IntCounterVec::new(
            Opts::new("feed_router_ticks_rejected_total", "Ticks rejected by validation"),
            &["source", "reason"],
        )?;

        let ticks_routed = IntCounterVec::new(
            Opts::new("feed_router_ticks_routed_total", "Ticks forwarded as authoritative"),
            &["source", "routing_reason"],
        )?;

        let ticks_dropped = IntCounterVec::new(
            Opts::new("feed_router_ticks_dropped_total", "Ticks dropped without error"),
            &["source", "cause"],
        )?;

        let normalize_errors = IntCounterVec::new(
            Opts::new("feed_router_normalize_errors_total", "Upstream messages that failed normalization"),
            &["source"],
        )?;

        let router_state = IntGauge::new(
            "feed_router_state",
            "Router state (0=primary, 1=fallback, 2=grace, 3=both unavailable)",
        )?;

        let state_transitions = IntCounterVec::new(
            Opts::new("feed_router_state_transitions_total", "Router state transitions"),
            &["from", "to"],
        )?;

        let source_health = IntGaugeVec::new(
            Opts::new(
                "feed_router_source_health",
                "Source health (2=connected, 1=degraded, 0=disconnected)",
            ),
            &["source"],
        )?;

        let reconnect_attempts = IntCounterVec::new(
            Opts::new("feed_router_reconnect_attempts_total", "Retries after source failures"),
            &["source"],
        )?;

        let fanout_published = IntCounter::new(
            "feed_router_fanout_published_total",
            "Ticks delivered to subscriber queues",
        )?;

        let fanout_throttled = IntCounter::new(
            "feed_router_fanout_throttled_total",
            "Ticks superseded within a throttle window",
        )?;

        let fanout_subscribers_dropped = IntCounterVec::new(
            Opts::new("feed_router_fanout_subscribers_dropped_total", "Subscribers removed"),
            &["cause"],
        )?;

        let fanout_subscribers = IntGauge::new(
            "feed_router_fanout_subscribers",
            "Live fan-out subscribers",
        )?;

        let fanout_replay_skipped = IntCounter::new(
            "feed_router_fanout_replay_skipped_total",
            "Cached ticks not replayed to new subscribers",
        )?;

        // Register all metrics
        registry.register(Box::new(ticks_received.clone()))?;
        registry.register(Box::new(ticks_rejected.clone()))?;
        registry.register(Box::new(ticks_routed.clone()))?;
        registry.register(Box::new(ticks_dropped.clone()))?;
        registry.register(Box::new(normalize_errors.clone()))?;
        registry.register(Box::new(router_state.clone()))?;
        registry.register(Box::new(state_transitions.clone()))?;
        registry.register(Box::new(source_health.clone()))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;
        registry.register(Box::new(fanout_published.clone()))?;
        registry.register(Box::new(fanout_throttled.clone()))?;
        registry.register(Box::new(fanout_subscribers_dropped.clone()))?;
        registry.register(Box::new(fanout_subscribers.clone()))?;
        registry.register(Box::new(fanout_replay_skipped.clone()))?;

        Ok(Self {
            registry,
            ticks_received,
            ticks_rejected,
            ticks_routed,
            ticks_dropped,
            normalize_errors,
            router_state,
            state_transitions,
            source_health,
            reconnect_attempts,
            fanout_published,
            fanout_throttled,
            fanout_subscribers_dropped,
            fanout_subscribers,
            fanout_replay_skipped,
        })
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move { metrics.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
