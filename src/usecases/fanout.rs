//! Broadcast Fan-out - Per-Symbol Throttle and Subscriber Delivery
//!
//! Receives the router's authoritative stream and pushes it to any
//! number of subscribers:
//! 1. Per-symbol trailing-edge throttle: at most one publish per
//!    `throttle_interval`, always the latest price of the window.
//! 2. Symbol- and asset-class-scoped subscriptions.
//! 3. Backpressure isolation: a subscriber whose queue stays full
//!    past `publish_timeout` is dropped instead of stalling others.
//!
//! The fan-out knows nothing about failover; it only sees
//! `RoutedTick`s.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::metrics::RouterMetrics;
use crate::config::FanoutConfig;
use crate::domain::tick::{AssetClass, RoutedTick};
use crate::ports::price_sink::PriceSink;
use crate::ports::symbol_catalog::CatalogEntry;

/// How long shutdown waits for the router to finish draining.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// What a subscriber wants to receive.
///
/// A tick matches when its symbol is listed or its symbol's asset
/// class is listed. An empty filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
  pub symbols: HashSet<String>,
  pub asset_classes: HashSet<AssetClass>,
}

impl SubscriptionFilter {
  /// Filter on explicit symbols.
  pub fn symbols<I, S>(symbols: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      symbols: symbols.into_iter().map(Into::into).collect(),
      asset_classes: HashSet::new(),
    }
  }

  /// Filter on whole asset classes.
  pub fn asset_classes<I>(classes: I) -> Self
  where
    I: IntoIterator<Item = AssetClass>,
  {
    Self {
      symbols: HashSet::new(),
      asset_classes: classes.into_iter().collect(),
    }
  }

  pub fn with_asset_class(mut self, class: AssetClass) -> Self {
    self.asset_classes.insert(class);
    self
  }

  pub fn matches(&self, symbol: &str, class: Option<AssetClass>) -> bool {
    self.symbols.contains(symbol) || class.is_some_and(|c| self.asset_classes.contains(&c))
  }
}

/// Handle returned by `subscribe`.
#[derive(Debug)]
pub struct Subscription {
  /// Identifier for `unsubscribe`.
  pub id: Uuid,
  /// Outbound queue. Yields `None` once the fan-out drops the subscriber or shuts down.
  pub receiver: mpsc::Receiver<RoutedTick>,
}

/// Per-symbol throttle bookkeeping.
#[derive(Debug, Clone)]
pub struct SymbolBroadcastState {
  pub symbol: String,
  pub last_broadcast_at: Option<Instant>,
  pub last_price: Option<Decimal>,
  pending: Option<RoutedTick>,
  deadline: Option<Instant>,
}

impl SymbolBroadcastState {
  fn new(symbol: String) -> Self {
    Self {
      symbol,
      last_broadcast_at: None,
      last_price: None,
      pending: None,
      deadline: None,
    }
  }

  /// Hold `tick` as the window's latest. Returns `true` if it replaced an unsent tick.
  fn offer(&mut self, tick: RoutedTick, now: Instant, interval: Duration) -> bool {
    if self.deadline.is_none() {
      let window_end = now + interval;
      let earliest = self.last_broadcast_at.map_or(window_end, |at| at + interval);
      self.deadline = Some(window_end.max(earliest));
    }
    self.pending.replace(tick).is_some()
  }

  fn take_due(&mut self, now: Instant) -> Option<RoutedTick> {
    if self.deadline.is_some_and(|d| d <= now) {
      self.take_pending(now)
    } else {
      None
    }
  }

  fn take_pending(&mut self, now: Instant) -> Option<RoutedTick> {
    let tick = self.pending.take()?;
    self.deadline = None;
    self.last_broadcast_at = Some(now);
    self.last_price = Some(tick.tick.price);
    Some(tick)
  }
}

/// Trailing-edge throttle over all symbols.
///
/// Owned by the fan-out loop only; not shared.
#[derive(Debug)]
pub struct SymbolThrottle {
  interval: Duration,
  states: HashMap<String, SymbolBroadcastState>,
}

impl SymbolThrottle {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      states: HashMap::new(),
    }
  }

  /// Queue `tick` for its symbol's window. Returns `true` when it superseded another tick.
  pub fn offer(&mut self, tick: RoutedTick, now: Instant) -> bool {
    let interval = self.interval;
    self
      .states
      .entry(tick.symbol().to_string())
      .or_insert_with_key(|symbol| SymbolBroadcastState::new(symbol.clone()))
      .offer(tick, now, interval)
  }

  /// Ticks whose window has closed by `now`.
  pub fn take_due(&mut self, now: Instant) -> Vec<RoutedTick> {
    self
      .states
      .values_mut()
      .filter_map(|s| s.take_due(now))
      .collect()
  }

  /// Every pending tick regardless of window, for shutdown.
  pub fn take_all(&mut self, now: Instant) -> Vec<RoutedTick> {
    self
      .states
      .values_mut()
      .filter_map(|s| s.take_pending(now))
      .collect()
  }

  /// Earliest window end among symbols with a pending tick.
  pub fn next_deadline(&self) -> Option<Instant> {
    self.states.values().filter_map(|s| s.deadline).min()
  }

  pub fn state(&self, symbol: &str) -> Option<&SymbolBroadcastState> {
    self.states.get(symbol)
  }
}

struct Subscriber {
  filter: SubscriptionFilter,
  tx: mpsc::Sender<RoutedTick>,
}

#[derive(Default)]
struct Registry {
  subscribers: HashMap<Uuid, Subscriber>,
  by_symbol: HashMap<String, HashSet<Uuid>>,
  by_class: HashMap<AssetClass, HashSet<Uuid>>,
  asset_classes: HashMap<String, AssetClass>,
  last_ticks: HashMap<String, RoutedTick>,
}

impl Registry {
  fn insert(&mut self, id: Uuid, subscriber: Subscriber) {
    for symbol in &subscriber.filter.symbols {
      self.by_symbol.entry(symbol.clone()).or_default().insert(id);
    }
    for class in &subscriber.filter.asset_classes {
      self.by_class.entry(*class).or_default().insert(id);
    }
    self.subscribers.insert(id, subscriber);
  }

  fn remove(&mut self, id: Uuid) -> bool {
    let Some(subscriber) = self.subscribers.remove(&id) else {
      return false;
    };
    for symbol in &subscriber.filter.symbols {
      if let Some(ids) = self.by_symbol.get_mut(symbol) {
        ids.remove(&id);
        if ids.is_empty() {
          self.by_symbol.remove(symbol);
        }
      }
    }
    for class in &subscriber.filter.asset_classes {
      if let Some(ids) = self.by_class.get_mut(class) {
        ids.remove(&id);
        if ids.is_empty() {
          self.by_class.remove(class);
        }
      }
    }
    true
  }

  fn targets(&self, symbol: &str) -> Vec<(Uuid, mpsc::Sender<RoutedTick>)> {
    let mut ids: HashSet<Uuid> = self.by_symbol.get(symbol).cloned().unwrap_or_default();
    if let Some(class_ids) = self
      .asset_classes
      .get(symbol)
      .and_then(|class| self.by_class.get(class))
    {
      ids.extend(class_ids);
    }

    ids
      .into_iter()
      .filter_map(|id| self.subscribers.get(&id).map(|s| (id, s.tx.clone())))
      .collect()
  }
}

/// Why a subscriber was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropCause {
  Slow,
  Closed,
}

impl DropCause {
  const fn as_str(self) -> &'static str {
    match self {
      Self::Slow => "slow",
      Self::Closed => "closed",
    }
  }
}

/// Fan-out from the router's output to subscribers.
pub struct BroadcastFanout {
  /// Subscription tables; never held across an await.
  registry: Mutex<Registry>,
  /// Metrics sink.
  metrics: Arc<RouterMetrics>,
  /// Per-symbol minimum publish gap.
  throttle_interval: Duration,
  /// Capacity of each subscriber queue.
  queue_capacity: usize,
  /// Longest a full subscriber may hold up one publish.
  publish_timeout: Duration,
}

impl BroadcastFanout {
  pub fn new(config: &FanoutConfig, metrics: Arc<RouterMetrics>) -> Self {
    Self {
      registry: Mutex::new(Registry::default()),
      metrics,
      throttle_interval: config.throttle_interval(),
      queue_capacity: config.subscriber_queue_capacity.max(1),
      publish_timeout: config.publish_timeout(),
    }
  }

  fn registry(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Learn asset classes from catalog entries.
  pub fn register_symbols(&self, entries: &[CatalogEntry]) {
    let mut registry = self.registry();
    for entry in entries {
      registry
        .asset_classes
        .insert(entry.symbol.clone(), entry.asset_class);
    }
  }

  /// Register a subscriber. Cached last ticks for matching symbols
  /// are queued right away.
  pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
    let id = Uuid::new_v4();
    let (tx, receiver) = mpsc::channel(self.queue_capacity);

    let mut registry = self.registry();
    let mut replayed = 0usize;
    let mut skipped = 0usize;
    for (symbol, tick) in &registry.last_ticks {
      let class = registry.asset_classes.get(symbol).copied();
      if !filter.matches(symbol, class) {
        continue;
      }
      match tx.try_send(tick.clone()) {
        Ok(()) => replayed += 1,
        Err(_) => skipped += 1,
      }
    }

    registry.insert(id, Subscriber { filter, tx });
    self
      .metrics
      .fanout_subscribers
      .set(registry.subscribers.len() as i64);
    drop(registry);

    if skipped > 0 {
      self.metrics.fanout_replay_skipped.inc_by(skipped as u64);
      warn!(subscriber = %id, replayed, skipped, "Subscriber queue too small for cached ticks");
    }
    debug!(subscriber = %id, replayed, "Subscriber registered");
    Subscription { id, receiver }
  }

  /// Remove a subscriber. Returns `false` if it was already gone.
  pub fn unsubscribe(&self, id: Uuid) -> bool {
    let mut registry = self.registry();
    let removed = registry.remove(id);
    self
      .metrics
      .fanout_subscribers
      .set(registry.subscribers.len() as i64);
    removed
  }

  pub fn subscriber_count(&self) -> usize {
    self.registry().subscribers.len()
  }

  /// Last published tick for `symbol`, if any.
  pub fn last_tick(&self, symbol: &str) -> Option<RoutedTick> {
    self.registry().last_ticks.get(symbol).cloned()
  }

  /// Drive a subscription into a `PriceSink`.
  ///
  /// The task ends when the subscription closes or the sink errors;
  /// on error only this sink is detached.
  pub fn attach_sink(
    self: &Arc<Self>,
    filter: SubscriptionFilter,
    sink: Arc<dyn PriceSink>,
  ) -> JoinHandle<()> {
    let Subscription { id, mut receiver } = self.subscribe(filter);
    let fanout = Arc::clone(self);

    tokio::spawn(async move {
      while let Some(tick) = receiver.recv().await {
        if let Err(e) = sink.on_routed_tick(tick).await {
          warn!(subscriber = %id, error = %e, "Price sink failed, detaching");
          fanout
            .metrics
            .fanout_subscribers_dropped
            .with_label_values(&["sink-error"])
            .inc();
          fanout.unsubscribe(id);
          return;
        }
      }
      debug!(subscriber = %id, "Price sink subscription closed");
    })
  }

  /// Deliver one tick to every matching subscriber now, bypassing the throttle.
  ///
  /// Full queues get one bounded wait, run concurrently, so the
  /// call returns within roughly `publish_timeout`.
  pub async fn publish(&self, tick: RoutedTick) {
    let targets = {
      let mut registry = self.registry();
      registry
        .last_ticks
        .insert(tick.symbol().to_string(), tick.clone());
      registry.targets(tick.symbol())
    };

    let mut delivered = 0u64;
    let mut slow = Vec::new();
    let mut dropped = Vec::new();

    for (id, tx) in targets {
      match tx.try_send(tick.clone()) {
        Ok(()) => delivered += 1,
        Err(TrySendError::Full(t)) => slow.push((id, tx, t)),
        Err(TrySendError::Closed(_)) => dropped.push((id, DropCause::Closed)),
      }
    }

    if !slow.is_empty() {
      let timeout = self.publish_timeout;
      let outcomes = join_all(slow.into_iter().map(|(id, tx, t)| async move {
        (id, tx.send_timeout(t, timeout).await)
      }))
      .await;

      for (id, outcome) in outcomes {
        match outcome {
          Ok(()) => delivered += 1,
          Err(SendTimeoutError::Timeout(_)) => dropped.push((id, DropCause::Slow)),
          Err(SendTimeoutError::Closed(_)) => dropped.push((id, DropCause::Closed)),
        }
      }
    }

    self.metrics.fanout_published.inc_by(delivered);

    if !dropped.is_empty() {
      let mut registry = self.registry();
      for (id, cause) in dropped {
        if registry.remove(id) {
          warn!(subscriber = %id, cause = cause.as_str(), symbol = %tick.symbol(), "Subscriber dropped");
          self
            .metrics
            .fanout_subscribers_dropped
            .with_label_values(&[cause.as_str()])
            .inc();
        }
      }
      self
        .metrics
        .fanout_subscribers
        .set(registry.subscribers.len() as i64);
    }
  }

  /// Close every subscriber queue.
  pub fn close_all(&self) {
    let mut registry = self.registry();
    let count = registry.subscribers.len();
    registry.subscribers.clear();
    registry.by_symbol.clear();
    registry.by_class.clear();
    self.metrics.fanout_subscribers.set(0);
    info!(count, "All subscribers closed");
  }

  /// Run the fan-out loop until shutdown or until the router output closes.
  ///
  /// Pending throttled ticks are flushed before subscribers are closed.
  #[instrument(skip_all, name = "broadcast_fanout")]
  pub async fn run(
    self: Arc<Self>,
    mut input: mpsc::Receiver<RoutedTick>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) {
    let mut throttle = SymbolThrottle::new(self.throttle_interval);

    info!(
      throttle_ms = self.throttle_interval.as_millis(),
      "Broadcast fan-out started"
    );

    loop {
      let deadline = throttle.next_deadline();

      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          // The router drains its queues on the same signal, then closes our input.
          let drain = async {
            while let Some(tick) = input.recv().await {
              self.offer(&mut throttle, tick);
            }
          };
          if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            warn!("Router output still open after shutdown, closing anyway");
          }
          break;
        }
        _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
          for tick in throttle.take_due(Instant::now()) {
            self.publish(tick).await;
          }
        }
        maybe = input.recv() => match maybe {
          Some(tick) => self.offer(&mut throttle, tick),
          None => {
            info!("Router output closed");
            break;
          }
        },
      }
    }

    for tick in throttle.take_all(Instant::now()) {
      self.publish(tick).await;
    }
    self.close_all();
    info!("Broadcast fan-out stopped");
  }

  fn offer(&self, throttle: &mut SymbolThrottle, tick: RoutedTick) {
    if throttle.offer(tick, Instant::now()) {
      self.metrics.fanout_throttled.inc();
    }
  }
}
