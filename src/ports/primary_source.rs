//! Primary Source Port - Streaming Market Data Interface
//!
//! Defines the trait for the low-latency streaming feed. The
//! upstream delivers heterogeneous messages (trades, quotes, bars);
//! the primary adapter pulls them one at a time and normalizes
//! them into `NormalizedTick`s.

use async_trait::async_trait;

use super::SourceError;

/// One raw message from the streaming feed, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
  /// Executed trade.
  Trade {
    /// Upstream symbol (may lack a venue prefix).
    symbol: String,
    /// Trade price.
    price: f64,
    /// Trade size.
    size: Option<f64>,
    /// Exchange timestamp (Unix ms).
    timestamp_ms: i64,
  },
  /// Top-of-book quote; normalized to the mid price.
  Quote {
    /// Upstream symbol.
    symbol: String,
    /// Best bid.
    bid: f64,
    /// Best ask.
    ask: f64,
    /// Size at best bid.
    bid_size: Option<f64>,
    /// Size at best ask.
    ask_size: Option<f64>,
    /// Exchange timestamp (Unix ms).
    timestamp_ms: i64,
  },
  /// Completed aggregate bar; normalized to its close.
  Bar {
    /// Upstream symbol.
    symbol: String,
    /// Closing price of the bar.
    close: f64,
    /// Bar volume.
    volume: Option<f64>,
    /// Bar end time (Unix ms).
    end_ms: i64,
  },
  /// Keep-alive with no price content.
  Heartbeat,
}

/// Trait for the streaming (primary) market data provider.
///
/// Pull-based: the adapter owns the source exclusively and calls
/// `next_message` in its own task. Errors are returned, never
/// panicked, and the adapter turns them into health events.
#[async_trait]
pub trait PrimarySource: Send + 'static {
  /// Open the upstream connection.
  async fn connect(&mut self) -> Result<(), SourceError>;

  /// Close the upstream connection. Idempotent.
  async fn disconnect(&mut self);

  /// Replace the current subscription with `symbols` (venue-qualified).
  async fn subscribe(&mut self, symbols: &[String]) -> Result<(), SourceError>;

  /// Wait for the next message.
  ///
  /// `Ok(None)` means the upstream closed the stream.
  async fn next_message(&mut self) -> Result<Option<RawMessage>, SourceError>;
}
