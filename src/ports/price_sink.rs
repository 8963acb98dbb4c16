//! Price Sink Port - Downstream Delivery Interface
//!
//! The transport that turns routed ticks into client wire messages
//! (web sockets, server push) lives outside this crate. It plugs in
//! here and is driven by the fan-out, one sink per subscription.

use async_trait::async_trait;

use crate::domain::tick::RoutedTick;

/// Receives every routed tick matching its subscription.
#[async_trait]
pub trait PriceSink: Send + Sync + 'static {
  /// Deliver one tick.
  ///
  /// An error detaches this sink from the fan-out; other sinks are
  /// unaffected.
  async fn on_routed_tick(&self, tick: RoutedTick) -> anyhow::Result<()>;
}
