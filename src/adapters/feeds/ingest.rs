//! Tick Ingest - Shared Adapter Pipeline
//!
//! Common tail of both source adapters: sequence assignment,
//! duplicate suppression, validation, health reporting and the
//! bounded hand-off to the router. Keeps the last accepted tick
//! per symbol for the circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::normalize::PendingTick;
use crate::adapters::metrics::RouterMetrics;
use crate::domain::health::HealthTracker;
use crate::domain::tick::{NormalizedTick, SourceId};
use crate::domain::validator::{Rejection, TickValidator};
use crate::ports::SourceError;

/// Health error recorded when the router queue overflows.
pub const QUEUE_FULL_ERROR: &str = "router queue full";

/// What happened to one normalized observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Handed to the router.
    Forwarded,
    /// Failed validation.
    Rejected(Rejection),
    /// Same symbol, timestamp and price as the last accepted tick.
    Duplicate,
    /// Router queue full; the new tick was dropped.
    QueueFull,
    /// Router is gone.
    RouterClosed,
}

/// Per-source ingest state. Owned by exactly one adapter task.
pub struct TickIngest {
    source: SourceId,
    validator: TickValidator,
    health: Arc<HealthTracker>,
    metrics: Arc<RouterMetrics>,
    output: mpsc::Sender<NormalizedTick>,
    /// Last accepted tick per symbol.
    last: HashMap<String, NormalizedTick>,
}

impl TickIngest {
    pub fn new(
        source: SourceId,
        validator: TickValidator,
        health: Arc<HealthTracker>,
        metrics: Arc<RouterMetrics>,
        output: mpsc::Sender<NormalizedTick>,
    ) -> Self {
        Self {
            source,
            validator,
            health,
            metrics,
            output,
            last: HashMap::new(),
        }
    }

    pub const fn source(&self) -> SourceId {
        self.source
    }

    pub fn last_tick(&self, symbol: &str) -> Option<&NormalizedTick> {
        self.last.get(symbol)
    }

    /// Run one observation through the pipeline as of `now`.
    ///
    /// Sequence numbers are only consumed by accepted ticks, so they
    /// stay strictly increasing per symbol.
    pub fn accept(&mut self, pending: PendingTick, now: DateTime<Utc>) -> IngestOutcome {
        let source = self.source.as_str();
        self.metrics.ticks_received.with_label_values(&[source]).inc();

        let previous = self.last.get(&pending.symbol);
        if previous.is_some_and(|p| p.timestamp == pending.timestamp && p.price == pending.price) {
            self.metrics
                .ticks_dropped
                .with_label_values(&[source, "duplicate"])
                .inc();
            self.health.record_success_at(self.source, now);
            return IngestOutcome::Duplicate;
        }

        let sequence = previous.map_or(1, |p| p.sequence + 1);
        let tick = pending.into_tick(self.source, sequence);

        if let Err(rejection) = self.validator.validate_at(&tick, previous, now) {
            debug!(
                symbol = %tick.symbol,
                source,
                reason = rejection.reason(),
                price = %tick.price,
                "Tick rejected"
            );
            self.metrics
                .ticks_rejected
                .with_label_values(&[source, rejection.reason()])
                .inc();
            return IngestOutcome::Rejected(rejection);
        }

        self.last.insert(tick.symbol.clone(), tick.clone());
        self.health.record_success_at(self.source, now);

        match self.output.try_send(tick) {
            Ok(()) => IngestOutcome::Forwarded,
            Err(TrySendError::Full(tick)) => {
                warn!(symbol = %tick.symbol, source, "Router queue full, dropping newest tick");
                self.metrics
                    .ticks_dropped
                    .with_label_values(&[source, "queue-full"])
                    .inc();
                self.health.record_failure_at(self.source, QUEUE_FULL_ERROR, now);
                IngestOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics
                    .ticks_dropped
                    .with_label_values(&[source, "router-closed"])
                    .inc();
                IngestOutcome::RouterClosed
            }
        }
    }

    /// A keep-alive: the upstream is alive but sent no price.
    pub fn heartbeat(&self, now: DateTime<Utc>) {
        self.health.record_success_at(self.source, now);
    }

    /// Connection established or poll answered.
    pub fn record_success(&self) {
        self.health.record_success(self.source);
    }

    /// Connection-level fault.
    pub fn record_failure(&self, error: &SourceError) {
        self.health.record_failure(self.source, error.to_string());
    }

    /// A retry is about to be scheduled after `delay_ms`.
    pub fn record_retry(&self, attempt: u32, delay_ms: u128, error: &SourceError) {
        self.metrics
            .reconnect_attempts
            .with_label_values(&[self.source.as_str()])
            .inc();
        warn!(
            source = self.source.as_str(),
            attempt,
            delay_ms,
            error = %error,
            "Source failed, retrying"
        );
    }

    /// Raw data that could not be normalized; counted, never forwarded.
    pub fn record_malformed(&self, error: &dyn std::fmt::Display) {
        debug!(source = self.source.as_str(), error = %error, "Skipping unusable message");
        self.metrics
            .normalize_errors
            .with_label_values(&[self.source.as_str()])
            .inc();
    }

    /// Whether the router side of the queue is still open.
    pub fn is_open(&self) -> bool {
        !self.output.is_closed()
    }
}
