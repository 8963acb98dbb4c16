//! Data Source Router - Failover Evaluation and Tick Routing
//!
//! The only component with cross-source knowledge. Two loops share
//! one `DataSourceRouter`:
//! 1. Evaluation loop: every `evaluation_interval`, reads both
//!    health snapshots, steps the failover state machine and
//!    publishes the new `RouterState` through an atomic.
//! 2. Routing loop: consumes both adapter queues and forwards ticks
//!    from whichever source the current state allows.
//!
//! Ticks never trigger transitions; only the evaluation loop does,
//! which keeps the state sequence a deterministic function of the
//! health history.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::RouterMetrics;
use crate::config::RouterConfig;
use crate::domain::failover::{FailoverMachine, RouterState, Transition};
use crate::domain::health::{ConnectionState, HealthTracker, SourceHealth};
use crate::domain::tick::{NormalizedTick, RoutedTick, SourceId};

/// Coarse service verdict for external health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
  Healthy,
  Degraded,
  Unavailable,
}

/// Read-only view of the router for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
  /// Current router mode.
  pub router_state: RouterState,
  /// Derived verdict.
  pub status: ServiceStatus,
  /// Primary health as the router sees it.
  pub primary: SourceHealth,
  /// Fallback health as the router sees it.
  pub fallback: SourceHealth,
  /// Snapshot time.
  pub at: DateTime<Utc>,
}

/// Receiving ends of the two adapter queues.
pub struct RouterInputs {
  /// Ticks from the primary adapter.
  pub primary: mpsc::Receiver<NormalizedTick>,
  /// Ticks from the fallback adapter.
  pub fallback: mpsc::Receiver<NormalizedTick>,
}

/// Failover router owning the `RouterState`.
pub struct DataSourceRouter {
  /// Current state, read lock-free by the routing path.
  state: AtomicU8,
  /// State machine; only the evaluator locks it.
  machine: Mutex<FailoverMachine>,
  /// Shared per-source health.
  health: Arc<HealthTracker>,
  /// Metrics sink.
  metrics: Arc<RouterMetrics>,
  /// Transition feed for operators and tests.
  transitions_tx: broadcast::Sender<Transition>,
  /// Evaluation loop period.
  evaluation_interval: Duration,
  /// Bound on a single hand-off to the fan-out queue.
  forward_timeout: Duration,
}

impl DataSourceRouter {
  /// Create a router starting in `PrimaryActive`.
  pub fn new(
    health: Arc<HealthTracker>,
    metrics: Arc<RouterMetrics>,
    evaluation_interval: Duration,
    grace_period: Duration,
  ) -> Self {
    let (transitions_tx, _) = broadcast::channel(256);
    let machine = FailoverMachine::new(grace_period);
    metrics.router_state.set(i64::from(machine.state().as_u8()));

    Self {
      state: AtomicU8::new(machine.state().as_u8()),
      machine: Mutex::new(machine),
      health,
      metrics,
      transitions_tx,
      evaluation_interval,
      forward_timeout: evaluation_interval,
    }
  }

  /// Create a router from the `[router]` config section.
  pub fn from_config(
    config: &RouterConfig,
    health: Arc<HealthTracker>,
    metrics: Arc<RouterMetrics>,
  ) -> Self {
    Self::new(
      health,
      metrics,
      config.evaluation_interval(),
      config.grace_period(),
    )
  }

  /// Current router state.
  pub fn state(&self) -> RouterState {
    RouterState::from_u8(self.state.load(Ordering::Acquire))
  }

  /// Shared health tracker.
  pub fn health(&self) -> &Arc<HealthTracker> {
    &self.health
  }

  /// Subscribe to state transitions as they happen.
  pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
    self.transitions_tx.subscribe()
  }

  /// Decide whether `tick` is authoritative under the current state.
  ///
  /// Ticks from the inactive source are dropped silently; that is
  /// expected during any state, not a fault.
  pub fn route(&self, tick: NormalizedTick) -> Option<RoutedTick> {
    let source = tick.source;
    match self.state().route(source) {
      Some(reason) => {
        self
          .metrics
          .ticks_routed
          .with_label_values(&[source.as_str(), reason.as_str()])
          .inc();
        Some(RoutedTick {
          tick,
          routing_reason: reason,
        })
      }
      None => {
        self
          .metrics
          .ticks_dropped
          .with_label_values(&[source.as_str(), "inactive-source"])
          .inc();
        None
      }
    }
  }

  /// Run one evaluation cycle as of `now`.
  pub fn evaluate_at(&self, now: DateTime<Utc>) -> Option<Transition> {
    let primary = self.health.snapshot(SourceId::Primary, now);
    let fallback = self.health.snapshot(SourceId::Fallback, now);

    for h in [&primary, &fallback] {
      self
        .metrics
        .source_health
        .with_label_values(&[h.source.as_str()])
        .set(h.state.gauge_value());
    }

    let transition = {
      let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
      let transition = machine.evaluate(&primary, &fallback, now);
      if let Some(t) = &transition {
        self.state.store(t.to.as_u8(), Ordering::Release);
      }
      transition
    }?;

    self.record_transition(&transition);
    Some(transition)
  }

  /// Health snapshot for external health checks.
  pub fn health_snapshot(&self) -> HealthSnapshot {
    self.health_snapshot_at(Utc::now())
  }

  pub fn health_snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
    let router_state = self.state();
    let primary = self.health.snapshot(SourceId::Primary, now);
    let fallback = self.health.snapshot(SourceId::Fallback, now);

    let status = match router_state {
      RouterState::BothUnavailable => ServiceStatus::Unavailable,
      RouterState::PrimaryActive if primary.state == ConnectionState::Connected => {
        ServiceStatus::Healthy
      }
      _ => ServiceStatus::Degraded,
    };

    HealthSnapshot {
      router_state,
      status,
      primary,
      fallback,
      at: now,
    }
  }

  fn record_transition(&self, t: &Transition) {
    self.metrics.router_state.set(i64::from(t.to.as_u8()));
    self
      .metrics
      .state_transitions
      .with_label_values(&[t.from.as_str(), t.to.as_str()])
      .inc();

    let degrading = matches!(
      t.to,
      RouterState::FallbackActive | RouterState::BothUnavailable
    );

    if degrading {
      warn!(
        from = %t.from,
        to = %t.to,
        primary_state = %t.primary.state,
        fallback_state = %t.fallback.state,
        primary_failures = t.primary.consecutive_failures,
        fallback_failures = t.fallback.consecutive_failures,
        primary_error = t.primary.last_error.as_deref().unwrap_or(""),
        at = %t.at,
        "Router state transition"
      );
    } else {
      info!(
        from = %t.from,
        to = %t.to,
        primary_state = %t.primary.state,
        fallback_state = %t.fallback.state,
        primary_failures = t.primary.consecutive_failures,
        fallback_failures = t.fallback.consecutive_failures,
        at = %t.at,
        "Router state transition"
      );
    }

    // No receivers is fine.
    let _ = self.transitions_tx.send(t.clone());
  }

  /// Run the evaluation loop until shutdown.
  ///
  /// The first evaluation happens one full interval after start, so
  /// adapters get a chance to connect before health is judged.
  #[instrument(skip(self, shutdown_rx), name = "router_evaluation")]
  pub async fn run_evaluation(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(self.evaluation_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    info!(
      interval_ms = self.evaluation_interval.as_millis(),
      state = %self.state(),
      "Router evaluation loop started"
    );

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Router evaluation loop shutting down");
          return;
        }
        _ = ticker.tick() => {
          self.evaluate_at(Utc::now());
        }
      }
    }
  }

  /// Run the routing loop until shutdown or until both inputs close.
  ///
  /// Ticks still queued at shutdown are drained and routed before
  /// the output is dropped, which closes the fan-out's input.
  #[instrument(skip_all, name = "router_routing")]
  pub async fn run_routing(
    self: Arc<Self>,
    inputs: RouterInputs,
    output: mpsc::Sender<RoutedTick>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) {
    let RouterInputs {
      primary: mut primary_rx,
      fallback: mut fallback_rx,
    } = inputs;
    let mut primary_open = true;
    let mut fallback_open = true;

    info!("Router routing loop started");

    while primary_open || fallback_open {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          let drained = self.drain(&mut primary_rx, &mut fallback_rx, &output).await;
          info!(drained, "Router routing loop shutting down");
          return;
        }
        maybe = primary_rx.recv(), if primary_open => match maybe {
          Some(tick) => {
            if !self.forward(tick, &output).await {
              return;
            }
          }
          None => {
            debug!("Primary input closed");
            primary_open = false;
          }
        },
        maybe = fallback_rx.recv(), if fallback_open => match maybe {
          Some(tick) => {
            if !self.forward(tick, &output).await {
              return;
            }
          }
          None => {
            debug!("Fallback input closed");
            fallback_open = false;
          }
        },
      }
    }

    info!("All router inputs closed");
  }

  /// Route and hand off one tick. Returns `false` once the output is gone.
  async fn forward(&self, tick: NormalizedTick, output: &mpsc::Sender<RoutedTick>) -> bool {
    let Some(routed) = self.route(tick) else {
      return true;
    };

    match output.send_timeout(routed, self.forward_timeout).await {
      Ok(()) => true,
      Err(SendTimeoutError::Timeout(routed)) => {
        warn!(symbol = %routed.symbol(), "Fan-out queue full, routed tick dropped");
        self
          .metrics
          .ticks_dropped
          .with_label_values(&[routed.source().as_str(), "output-full"])
          .inc();
        true
      }
      Err(SendTimeoutError::Closed(_)) => {
        info!("Fan-out input closed, routing stops");
        false
      }
    }
  }

  async fn drain(
    &self,
    primary_rx: &mut mpsc::Receiver<NormalizedTick>,
    fallback_rx: &mut mpsc::Receiver<NormalizedTick>,
    output: &mpsc::Sender<RoutedTick>,
  ) -> usize {
    let mut drained = 0;
    for rx in [primary_rx, fallback_rx] {
      while let Ok(tick) = rx.try_recv() {
        drained += 1;
        if !self.forward(tick, output).await {
          return drained;
        }
      }
    }
    drained
  }
}
