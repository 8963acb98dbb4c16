//! Tracing Price Sink - Routed Ticks as Log Events
//!
//! Emits one `debug` event per routed tick. Useful as the default
//! sink when no client transport is attached, and for operators
//! following a single symbol with `RUST_LOG`.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::tick::RoutedTick;
use crate::ports::price_sink::PriceSink;

/// Logs every routed tick it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPriceSink;

#[async_trait]
impl PriceSink for TracingPriceSink {
    async fn on_routed_tick(&self, tick: RoutedTick) -> anyhow::Result<()> {
        debug!(
            symbol = %tick.tick.symbol,
            price = %tick.tick.price,
            source = %tick.tick.source,
            sequence = tick.tick.sequence,
            routing_reason = %tick.routing_reason,
            timestamp = %tick.tick.timestamp,
            "Routed tick"
        );
        Ok(())
    }
}
